use super::{ConnectorCommand, ConnectorProcess, IntegrationLauncher, OsProcess};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

/// Spawns a local executable with the connector entrypoint arguments appended
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Arguments placed before the entrypoint (`read`/`write`)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl IntegrationLauncher for CommandLauncher {
    fn launch(
        &self,
        job_root: &Path,
        command: &ConnectorCommand,
        files: &[(String, String)],
    ) -> Result<Box<dyn ConnectorProcess>> {
        fs::create_dir_all(job_root)?;
        for (name, contents) in files {
            if Path::new(name).components().count() != 1 {
                return Err(Error::config(format!("job file name must be a plain file name: {name}")));
            }
            fs::write(job_root.join(name), contents)?;
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .args(command.args(job_root))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(job_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::worker(format!("failed to launch {}: {e}", self.program.display()))
            })?;

        info!(
            program = %self.program.display(),
            pid = child.id(),
            job_root = %job_root.display(),
            "connector launched"
        );
        Ok(Box::new(OsProcess::new(child)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    #[test]
    fn test_launch_materializes_files() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = CommandLauncher::new("sh").with_args(["-c", "cat \"$3\"", "connector"]);
        let command = ConnectorCommand::Write {
            config: "destination_config.json".into(),
            catalog: "destination_catalog.json".into(),
        };
        let files = vec![
            ("destination_config.json".to_string(), r#"{"host":"db"}"#.to_string()),
            ("destination_catalog.json".to_string(), r#"{"streams":[]}"#.to_string()),
        ];

        let mut process = launcher.launch(dir.path(), &command, &files).unwrap();
        let mut output = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut output)
            .unwrap();
        assert_eq!(output, r#"{"host":"db"}"#);
        assert_eq!(process.wait_timeout(Duration::from_secs(5)).unwrap(), Some(0));
        assert!(dir.path().join("destination_catalog.json").exists());
    }

    #[test]
    fn test_rejects_nested_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = CommandLauncher::new("true");
        let command = ConnectorCommand::Write {
            config: "c.json".into(),
            catalog: "k.json".into(),
        };
        let files = vec![("../escape.json".to_string(), "{}".to_string())];
        assert!(launcher.launch(dir.path(), &command, &files).is_err());
    }
}
