//! Unattended daemon mode
//!
//! Runs the connection manager as a long-lived supervisor: sessions that end
//! (budget exhausted, unrecoverable error) are restarted after a cooldown
//! until SIGINT/SIGTERM asks for teardown. Auto-reconnect is forced on -
//! there is nobody at the keyboard to click reconnect.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tveil_core::machine::{ConnectionManager, ConnectionState, EventSink, Notification};
use tveil_core::Config;

/// Pause between supervised sessions
const SESSION_COOLDOWN: Duration = Duration::from_secs(15);

/// Sink that folds notifications into the tracing stream
struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Notification) {
        match event {
            Notification::StateChanged { old, new } => {
                info!(%old, %new, "state changed");
            }
            Notification::InterfaceResolved(iface) => {
                info!(interface = %iface, "tethering interface resolved");
            }
            Notification::HealthDegraded(sample) => {
                warn!(
                    latency_ms = sample.latency_ms,
                    loss_pct = sample.loss_pct,
                    integrity = sample.integrity,
                    "connection degraded"
                );
            }
            Notification::RecoveryAttempted(attempt) => {
                info!(
                    code = %attempt.record.code,
                    outcome = ?attempt.outcome,
                    attempted_auto_fix = attempt.attempted_auto_fix,
                    "recovery attempted"
                );
            }
        }
    }
}

/// Run the daemon until a termination signal arrives.
///
/// Returns an error if the final teardown left an error record behind.
pub fn run(mut config: Config) -> Result<()> {
    config.general.auto_reconnect = true;

    let components =
        tveil_platform::default_components(&config).context("building platform components")?;
    let handle = ConnectionManager::spawn(config, components, Arc::new(LogSink))
        .context("starting connection manager")?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let requester = handle.requester();
        ctrlc::set_handler(move || {
            if !stop.swap(true, Ordering::SeqCst) {
                info!("termination signal received, disconnecting");
                requester.disconnect();
            }
        })
        .context("installing signal handler")?;
    }

    info!("daemon started");
    handle.connect();

    while !stop.load(Ordering::SeqCst) {
        let state = handle.wait_for(
            |s| s == ConnectionState::Disconnected,
            Duration::from_millis(500),
        );
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if state != ConnectionState::Disconnected {
            continue;
        }

        if let Some(record) = handle.last_error() {
            warn!(
                code = %record.code,
                category = %record.category,
                "session ended with an error"
            );
            for step in &record.manual_steps {
                warn!(step = %step, "manual remediation");
            }
        }

        info!(cooldown_s = SESSION_COOLDOWN.as_secs(), "restarting session after cooldown");
        let deadline = Instant::now() + SESSION_COOLDOWN;
        while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
        handle.connect();
    }

    // Signal path: make sure teardown finished before we leave
    handle.wait_for(
        |s| s == ConnectionState::Disconnected,
        Duration::from_secs(60),
    );
    let last_error = handle.last_error();
    handle.shutdown();
    info!("daemon stopped");

    if let Some(record) = last_error {
        anyhow::bail!(
            "shut down after error {} ({}): {}",
            record.code,
            record.category,
            record.message
        );
    }
    Ok(())
}
