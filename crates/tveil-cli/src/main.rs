//! TetherVeil CLI
//!
//! Command-line interface for the tethering connection orchestrator.

mod args;
mod commands;
mod logging;
mod sink;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::Args;
use commands::Command;

fn main() -> Result<()> {
    let args = Args::parse();

    // Completions write to stdout for eval; never decorate that
    if let Some(Command::Completions(comp_args)) = &args.command {
        return commands::completions::execute(comp_args.shell);
    }

    let config = args.resolve_config()?;
    let _guard = logging::init(&args, &config.logging)?;

    if !args.quiet {
        print_banner();
    }

    let result = run(args, config);
    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }
    result
}

fn run(args: Args, config: tveil_core::Config) -> Result<()> {
    match args.command {
        Some(Command::Connect(connect_args)) => {
            commands::connect::execute(connect_args, config, args.quiet)
        }
        Some(Command::Daemon(daemon_args)) => commands::daemon::execute(daemon_args, config),
        Some(Command::Config(config_args)) => commands::config::execute(config_args, config),
        Some(Command::Doctor(doctor_args)) => commands::doctor::execute(doctor_args),
        Some(Command::Completions(_)) => unreachable!("handled before logging init"),
        None => {
            // Bare invocation connects, like the original tool
            let connect_args = commands::connect::ConnectArgs {
                usb: false,
                wifi: false,
                proxy_port: None,
                no_auto_reconnect: false,
                check: false,
            };
            commands::connect::execute(connect_args, config, args.quiet)
        }
    }
}

fn print_banner() {
    use colored::Colorize;

    println!();
    println!(
        "  {} {}",
        "TetherVeil".green().bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!("  {}", "tethered traffic, dressed as phone traffic".dimmed());
    println!();
}
