//! Connector process seam
//!
//! The worker never decides how a connector is launched. An
//! [`IntegrationLauncher`] materializes the input files inside the job root
//! and hands back a [`ConnectorProcess`] with piped stdio; [`CommandLauncher`]
//! is the bare-exec implementation.

mod launcher;
mod os;

pub use launcher::CommandLauncher;
pub use os::OsProcess;

use crate::Result;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

pub const SOURCE_CONFIG_JSON: &str = "source_config.json";
pub const SOURCE_CATALOG_JSON: &str = "source_catalog.json";
pub const INPUT_STATE_JSON: &str = "input_state.json";
pub const DESTINATION_CONFIG_JSON: &str = "destination_config.json";
pub const DESTINATION_CATALOG_JSON: &str = "destination_catalog.json";

/// A running connector with piped stdio
pub trait ConnectorProcess: Send {
    /// Write side of the connector's stdin; `None` once taken
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>>;

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;

    fn is_alive(&mut self) -> bool;

    /// Wait up to `timeout` for exit; `Ok(None)` if still running
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<i32>>;

    /// Forcefully terminate. Killing an exited process is not an error.
    fn kill(&mut self) -> io::Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// Which connector entrypoint to run and with which files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorCommand {
    Read {
        config: String,
        catalog: String,
        state: Option<String>,
    },
    Write {
        config: String,
        catalog: String,
    },
}

impl ConnectorCommand {
    /// Arguments with file names resolved against `job_root`
    pub fn args(&self, job_root: &Path) -> Vec<String> {
        let path = |name: &str| job_root.join(name).to_string_lossy().into_owned();
        match self {
            Self::Read {
                config,
                catalog,
                state,
            } => {
                let mut args = vec![
                    "read".to_string(),
                    "--config".to_string(),
                    path(config),
                    "--catalog".to_string(),
                    path(catalog),
                ];
                if let Some(state) = state {
                    args.push("--state".to_string());
                    args.push(path(state));
                }
                args
            }
            Self::Write { config, catalog } => vec![
                "write".to_string(),
                "--config".to_string(),
                path(config),
                "--catalog".to_string(),
                path(catalog),
            ],
        }
    }
}

/// Launches connectors for a job
pub trait IntegrationLauncher: Send + Sync {
    /// Write `files` (name, contents) into `job_root` and start `command`
    fn launch(
        &self,
        job_root: &Path,
        command: &ConnectorCommand,
        files: &[(String, String)],
    ) -> Result<Box<dyn ConnectorProcess>>;
}
