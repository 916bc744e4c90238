//! Console event sink
//!
//! Renders state machine notifications for an interactive terminal. Runs on
//! the owner loop, so it only formats and prints - nothing blocking.

use colored::Colorize;
use tveil_core::machine::{ConnectionState, EventSink, Notification};
use tveil_core::recovery::RecoveryOutcome;

/// Prints notifications to stdout, unless quiet
pub struct ConsoleSink {
    quiet: bool,
    color: bool,
}

impl ConsoleSink {
    /// Create a sink; color output only when stdout is a terminal
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            color: atty::is(atty::Stream::Stdout),
        }
    }

    fn state_label(&self, state: ConnectionState) -> String {
        let label = state.to_string();
        if !self.color {
            return label;
        }
        match state {
            ConnectionState::Connected => label.green().bold().to_string(),
            ConnectionState::Disconnected => label.white().to_string(),
            ConnectionState::Error | ConnectionState::ErrorRecovery => {
                label.red().bold().to_string()
            }
            _ => label.yellow().to_string(),
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &Notification) {
        if self.quiet {
            return;
        }
        match event {
            Notification::StateChanged { old, new } => {
                println!(
                    "  {} {} -> {}",
                    "state:".dimmed(),
                    self.state_label(*old),
                    self.state_label(*new)
                );
            }
            Notification::InterfaceResolved(iface) => {
                println!("  {} {}", "tether:".dimmed(), iface);
            }
            Notification::HealthDegraded(sample) => {
                let line = format!(
                    "health degraded: latency {:.0} ms, loss {:.0}%, integrity {:.0}%",
                    sample.latency_ms,
                    sample.loss_pct,
                    sample.integrity * 100.0
                );
                println!("  {}", if self.color { line.yellow().to_string() } else { line });
            }
            Notification::RecoveryAttempted(attempt) => {
                let line = match attempt.outcome {
                    RecoveryOutcome::Resolved => {
                        format!("auto-fix resolved {}", attempt.record.code)
                    }
                    RecoveryOutcome::Failed => {
                        format!("auto-fix failed for {}", attempt.record.code)
                    }
                    RecoveryOutcome::Escalated => {
                        format!("no auto-fix for {}, see manual steps", attempt.record.code)
                    }
                };
                println!("  {}", if self.color { line.cyan().to_string() } else { line });
            }
        }
    }
}
