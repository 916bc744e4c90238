//! Doctor command - environment preflight

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use tveil_platform::{has_blocking_failure, run_preflight, ShellRunner};

/// Doctor command arguments
#[derive(Args, Debug)]
pub struct DoctorArgs {}

/// Execute the doctor command
pub fn execute(_args: DoctorArgs) -> Result<()> {
    let runner = ShellRunner::new();
    let checks = run_preflight(&runner);

    println!("environment checks:");
    for check in &checks {
        let mark = if check.ok {
            "ok".green()
        } else if check.required {
            "FAIL".red().bold()
        } else {
            "warn".yellow()
        };
        println!("  [{mark:>4}] {:<32} {}", check.name, check.detail.dimmed());
    }

    if has_blocking_failure(&checks) {
        bail!("environment is not ready; fix the failed checks above");
    }
    println!("{}", "ready to connect".green());
    Ok(())
}
