//! TOML job file

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use synclane_core::{
    CommandLauncher, ConnectorConfigUpdater, NamespaceDefinition, StandardSyncInput, State, WorkerConfig,
};
use synclane_protocol::{ConfiguredAirbyteCatalog, Version};
use tracing::info;
use uuid::Uuid;

/// One replication job as described by `job.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: String,
    #[serde(default)]
    pub attempt: u32,
    pub workspace_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub destination_id: Option<Uuid>,
    /// Directory the connectors' input files are written to
    pub job_root: PathBuf,
    /// Configured catalog (JSON, newest protocol major)
    pub catalog: PathBuf,
    /// Input state (JSON), if any
    pub state: Option<PathBuf>,
    pub source: ConnectorConfig,
    pub destination: ConnectorConfig,
    #[serde(default)]
    pub namespace: NamespaceConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Program followed by its leading arguments; `read`/`write` is appended
    pub command: Vec<String>,
    pub protocol_version: Version,
    /// Connector configuration (JSON)
    pub config: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Pick the protocol version from the connector's SPEC output
    #[serde(default)]
    pub detect_version: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default)]
    pub definition: NamespaceDefinition,
    pub format: Option<String>,
    pub prefix: Option<String>,
}

impl JobConfig {
    /// Load a job file; relative paths inside it are resolved against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading job file {}", path.display()))?;
        let mut config: JobConfig =
            toml::from_str(&content).with_context(|| format!("parsing job file {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            bail!("job_id must not be empty");
        }
        for (role, connector) in [("source", &self.source), ("destination", &self.destination)] {
            if connector.command.is_empty() {
                bail!("{role}.command must name a program");
            }
        }
        if self.namespace.definition == NamespaceDefinition::CustomFormat && self.namespace.format.is_none() {
            bail!("namespace.format is required with the custom_format definition");
        }
        if let Err(e) = self.worker.validate() {
            bail!("invalid [worker] table: {e}");
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.job_root);
        resolve(&mut self.catalog);
        if let Some(state) = self.state.as_mut() {
            resolve(state);
        }
        resolve(&mut self.source.config);
        resolve(&mut self.destination.config);
    }

    /// Read the referenced JSON files into a worker input
    pub fn sync_input(&self) -> Result<StandardSyncInput> {
        let catalog: ConfiguredAirbyteCatalog = read_json(&self.catalog)?;
        let mut input = StandardSyncInput::new(
            read_json(&self.source.config)?,
            read_json(&self.destination.config)?,
            catalog,
        );
        input.state = match &self.state {
            Some(path) => Some(State {
                state: read_json::<Value>(path)?,
            }),
            None => None,
        };
        input.workspace_id = self.workspace_id;
        input.connection_id = self.connection_id;
        input.source_id = self.source_id;
        input.destination_id = self.destination_id;
        input.namespace_definition = self.namespace.definition;
        input.namespace_format = self.namespace.format.clone();
        input.prefix = self.namespace.prefix.clone();
        Ok(input)
    }

    /// Persist connector-requested configuration updates back into the job's config files
    pub fn config_updater(&self) -> ConfigFileUpdater {
        ConfigFileUpdater {
            source: self.source.config.clone(),
            destination: self.destination.config.clone(),
        }
    }
}

/// Rewrites the source and destination config files in place
#[derive(Debug, Clone)]
pub struct ConfigFileUpdater {
    source: PathBuf,
    destination: PathBuf,
}

impl ConfigFileUpdater {
    fn write(path: &Path, config: &Value) -> synclane_core::Result<()> {
        fs::write(path, serde_json::to_string_pretty(config)?)?;
        info!(path = %path.display(), "connector configuration file rewritten");
        Ok(())
    }
}

impl ConnectorConfigUpdater for ConfigFileUpdater {
    fn update_source(&self, _source_id: Option<Uuid>, config: &Value) -> synclane_core::Result<()> {
        Self::write(&self.source, config)
    }

    fn update_destination(&self, _destination_id: Option<Uuid>, config: &Value) -> synclane_core::Result<()> {
        Self::write(&self.destination, config)
    }
}

impl ConnectorConfig {
    pub fn launcher(&self) -> Result<CommandLauncher> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("connector command is empty");
        };
        let launcher = self
            .env
            .iter()
            .fold(CommandLauncher::new(program).with_args(args.iter().cloned()), |l, (k, v)| {
                l.with_env(k.clone(), v.clone())
            });
        Ok(launcher)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
