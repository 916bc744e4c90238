//! CLI commands

pub mod completions;
pub mod config;
pub mod connect;
pub mod daemon;
pub mod doctor;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the tethered connection up (main command)
    Connect(connect::ConnectArgs),

    /// Run unattended with supervised reconnection
    Daemon(daemon::DaemonArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Check the environment for required tools and privileges
    Doctor(doctor::DoctorArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}
