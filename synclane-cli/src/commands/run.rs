//! `synclane run`

use crate::config::JobConfig;
use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use synclane_core::{
    Error as WorkerError, FailureReason, HeartbeatMonitor, ProcessDestination, ProcessSource,
    ReplicationOutput, ReplicationStatus, ReplicationWorker, StaticFeatureFlags,
};
use synclane_protocol::ProtocolRegistry;
use tracing::{error, info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job file
    #[arg(long, env = "SYNCLANE_CONFIG")]
    pub config: PathBuf,

    /// Write the replication output here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<ExitCode> {
    let job = JobConfig::load(&args.config)?;
    let input = job.sync_input()?;
    let monitor = Arc::new(HeartbeatMonitor::new(job.worker.heartbeat_freshness));
    let worker = Arc::new(build_worker(&job, Arc::clone(&monitor))?);
    let flags = Arc::new(StaticFeatureFlags::from_config(&job.worker));

    info!(job_id = %job.job_id, attempt = job.attempt, "running replication job");
    let mut task = {
        let worker = Arc::clone(&worker);
        let job_root = job.job_root.clone();
        tokio::task::spawn_blocking(move || worker.run_with_heartbeat(&input, &job_root, monitor, flags))
    };

    let result = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, cancelling replication");
            let canceller = Arc::clone(&worker);
            tokio::task::spawn_blocking(move || canceller.cancel()).await?;
            task.await?
        }
    };

    match result {
        Ok(output) => {
            write_output(&output, args.output.as_ref())?;
            Ok(exit_code(output.status()))
        }
        Err(e @ WorkerError::HeartbeatTimeout(_)) => {
            error!(error = %e, "replication stopped by the heartbeat guard");
            match worker.last_output() {
                Some(output) => {
                    let reason = FailureReason::from_error(&e, &job.job_id, job.attempt);
                    write_output(&output.fail_with(reason), args.output.as_ref())?;
                }
                None => warn!("no partial output to write"),
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("replication worker failed"),
    }
}

/// Wire source, destination and worker from a job file; the source beats `monitor`
pub fn build_worker(job: &JobConfig, monitor: Arc<HeartbeatMonitor>) -> Result<ReplicationWorker> {
    let registry = Arc::new(ProtocolRegistry::standard()?);
    let source = ProcessSource::new(
        Arc::new(job.source.launcher()?),
        Arc::clone(&registry),
        job.source.protocol_version.clone(),
        monitor,
        job.worker.clone(),
    )
    .with_version_detection(job.source.detect_version);
    let destination = ProcessDestination::new(
        Arc::new(job.destination.launcher()?),
        registry,
        job.destination.protocol_version.clone(),
        job.worker.clone(),
    );
    Ok(ReplicationWorker::new(
        job.job_id.clone(),
        job.attempt,
        Arc::new(source),
        Arc::new(destination),
        job.worker.clone(),
    )
    .with_config_updater(Arc::new(job.config_updater())))
}

/// Completed is the only successful outcome
pub fn exit_code(status: ReplicationStatus) -> ExitCode {
    match status {
        ReplicationStatus::Completed => ExitCode::SUCCESS,
        ReplicationStatus::Failed => ExitCode::from(1),
        ReplicationStatus::Cancelled => ExitCode::from(130),
    }
}

fn write_output(output: &ReplicationOutput, path: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(output)?;
    match path {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing output to {}", path.display()))?;
            info!(path = %path.display(), "replication output written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
