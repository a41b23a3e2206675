//! Synclane CLI - job file loading and the `run` / `convert` subcommands

pub mod commands;
pub mod config;
