//! Daemon command - unattended supervised mode

use anyhow::Result;
use clap::Args;
use tveil_core::config::Config;

/// Daemon command arguments
#[derive(Args, Debug)]
pub struct DaemonArgs {}

/// Execute the daemon command
pub fn execute(_args: DaemonArgs, config: Config) -> Result<()> {
    config.validate()?;
    tveil_service::run(config)
}
