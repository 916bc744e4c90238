//! Config command - configuration management

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use tveil_core::config::{Config, Profile};

use crate::args::default_config_path;

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration as TOML
    Show,

    /// Write a configuration file seeded from a profile
    Init {
        /// Output file path (default: the user config location)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Profile to seed from
        #[arg(short, long, default_value = "standard")]
        profile: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },

    /// Show the config file location
    Path,
}

/// Execute the config command
pub fn execute(args: ConfigArgs, config: Config) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            print!("{}", config.to_toml());
            Ok(())
        }
        ConfigAction::Init {
            output,
            profile,
            force,
        } => init_config(output, &profile, force),
        ConfigAction::Validate { file } => {
            let config = Config::load(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            config.validate()?;
            println!("{} is valid", file.display());
            Ok(())
        }
        ConfigAction::Path => {
            match default_config_path() {
                Some(path) => println!("{}", path.display()),
                None => bail!("no home directory available"),
            }
            Ok(())
        }
    }
}

fn init_config(output: Option<PathBuf>, profile_name: &str, force: bool) -> Result<()> {
    let Some(profile) = Profile::parse(profile_name) else {
        bail!("unknown profile '{profile_name}' (expected standard, compat, paranoid or custom)");
    };

    let path = match output {
        Some(path) => path,
        None => default_config_path().context("no home directory available")?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let config = Config::from_profile(profile);
    let content = format!(
        "# TetherVeil configuration\n# Seeded from profile: {profile_name}\n\n{}",
        config.to_toml()
    );
    std::fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("wrote {}", path.display());
    Ok(())
}
