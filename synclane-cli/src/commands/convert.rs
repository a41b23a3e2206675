//! `synclane convert`

use anyhow::Result;
use clap::Args;
use std::io::{self, BufRead, BufWriter, Write};
use std::process::ExitCode;
use synclane_protocol::{ProtocolRegistry, Version};
use tracing::info;

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Protocol version of the incoming stream
    #[arg(long)]
    pub from: Version,

    /// Protocol version to write
    #[arg(long)]
    pub to: Version,

    /// Take the incoming version from a SPEC message when one is present
    #[arg(long)]
    pub detect: bool,
}

pub fn execute(args: ConvertArgs) -> Result<ExitCode> {
    let registry = ProtocolRegistry::standard()?;
    let stdin = io::stdin().lock();
    let stdout = BufWriter::new(io::stdout().lock());
    let written = convert(&registry, stdin, stdout, &args.from, &args.to, args.detect)?;
    info!(messages = written, from = %args.from, to = %args.to, "conversion finished");
    Ok(ExitCode::SUCCESS)
}

/// Re-encode every valid message of `input` at `to`, returning how many were written
pub fn convert<R: BufRead, W: Write>(
    registry: &ProtocolRegistry,
    input: R,
    output: W,
    from: &Version,
    to: &Version,
    detect: bool,
) -> Result<u64> {
    let reader = registry
        .reader(input, from, None)
        .with_version_detection(detect)
        .with_connector_name("stdin");
    let mut writer = registry.writer(output, to, None)?;

    let mut written = 0;
    for message in reader {
        writer.write(message?)?;
        written += 1;
    }
    writer.close()?;
    Ok(written)
}
