//! Link quality probing
//!
//! Measures latency and loss by running the system `ping` against a
//! well-known host through the tether and parsing its summary lines.

use std::sync::Arc;
use tracing::trace;
use tveil_core::health::{LinkProbe, LinkStats};
use tveil_core::ops::{Operation, OperationRunner};
use tveil_core::recovery::RawFailure;

/// Default probe target; answers ICMP from everywhere
const DEFAULT_TARGET: &str = "8.8.8.8";

/// Latency/loss probe backed by the system `ping`
pub struct PingProbe {
    runner: Arc<dyn OperationRunner>,
    target: String,
    count: u32,
}

impl PingProbe {
    /// Create a probe against the default target
    pub fn new(runner: Arc<dyn OperationRunner>) -> Self {
        Self {
            runner,
            target: DEFAULT_TARGET.to_string(),
            count: 3,
        }
    }

    /// Override the probe target
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    fn operation(&self) -> Operation {
        Operation::new("link_probe", "ping")
            .args([
                "-n",
                "-q",
                "-c",
                &self.count.to_string(),
                "-i",
                "0.2",
                "-W",
                "1",
                &self.target,
            ])
            // count * (interval + wait) plus slack
            .timeout_ms(u64::from(self.count) * 1_500 + 2_000)
    }
}

impl LinkProbe for PingProbe {
    fn sample(&self) -> Result<LinkStats, RawFailure> {
        let op = self.operation();
        match self.runner.run(&op) {
            Ok(output) => {
                // ping exits nonzero on total loss but still prints the
                // summary; parse first, judge later
                if let Some(stats) = parse_ping_summary(&output.stdout) {
                    trace!(latency_ms = stats.latency_ms, loss_pct = stats.loss_pct, "ping sample");
                    Ok(stats)
                } else if output.success() {
                    Err(RawFailure::signal(
                        "link_probe",
                        "ping output had no parsable summary",
                    ))
                } else {
                    Err(RawFailure::from_output(&op, &output))
                }
            }
            Err(e) => Err(RawFailure::from_error(op.name, &e)),
        }
    }
}

/// Parse the `ping -q` summary into latency/loss.
///
/// Expects the usual two lines:
/// `3 packets transmitted, 3 received, 0% packet loss, time 403ms`
/// `rtt min/avg/max/mdev = 35.893/36.700/37.471/0.645 ms`
///
/// With 100% loss there is no rtt line; latency is reported as infinite.
fn parse_ping_summary(stdout: &str) -> Option<LinkStats> {
    let mut loss_pct: Option<f64> = None;
    let mut latency_ms: Option<f64> = None;

    for line in stdout.lines() {
        if line.contains("packet loss") {
            loss_pct = line
                .split(',')
                .find(|part| part.contains("packet loss"))
                .and_then(|part| part.trim().split('%').next())
                .and_then(|pct| pct.trim().parse::<f64>().ok());
        }
        if line.trim_start().starts_with("rtt") || line.trim_start().starts_with("round-trip") {
            latency_ms = line
                .split('=')
                .nth(1)
                .and_then(|vals| vals.trim().split('/').nth(1))
                .and_then(|avg| avg.parse::<f64>().ok());
        }
    }

    let loss_pct = loss_pct?;
    Some(LinkStats {
        latency_ms: latency_ms.unwrap_or(f64::INFINITY),
        loss_pct,
    })
}
