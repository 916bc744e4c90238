//! Command-line argument parsing

use crate::commands::Command;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tveil_core::config::{Config, Profile};

/// TetherVeil - tethering connection orchestrator
///
/// Brings this machine online through a phone's USB or WiFi tether and
/// disguises the traffic as native phone traffic so the carrier's tethering
/// detection stays quiet.
#[derive(Parser, Debug)]
#[command(name = "tetherveil")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Subcommand to execute (default: connect)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Profile preset: standard, compat, paranoid, custom
    #[arg(short = 'p', long, global = true)]
    pub profile: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for logs
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Log file path
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Run in quiet mode (errors only, no banner)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// Structured JSON
    Json,
    /// Compact single-line text
    Compact,
}

impl Args {
    /// Resolve the effective configuration.
    ///
    /// Precedence: `--profile` > `--config FILE` > default config file >
    /// built-in defaults.
    pub fn resolve_config(&self) -> Result<Config> {
        if let Some(name) = &self.profile {
            let Some(profile) = Profile::parse(name) else {
                bail!("unknown profile '{name}' (expected standard, compat, paranoid or custom)");
            };
            return Ok(Config::from_profile(profile));
        }

        if let Some(path) = &self.config {
            return Config::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Config::load(&path)
                    .with_context(|| format!("failed to load config from {}", path.display()));
            }
        }

        Ok(Config::default())
    }
}

/// The conventional config file location for this user
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tetherveil")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
