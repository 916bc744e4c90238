//! Connection health monitoring
//!
//! A single polling thread samples link quality (latency, loss) and bypass
//! integrity on a fixed interval. Degradation is debounced: it takes M
//! consecutive breaching samples to raise an event, so one bad ping does not
//! bounce the connection. A failed layer verification degrades immediately.
//!
//! After emitting one degradation event the monitor pauses itself until the
//! owner resumes it - the owner never sees duplicate events for the same
//! incident while recovery is still in flight.

use crate::config::HealthConfig;
use crate::machine::OwnerEvent;
use crate::pipeline::BypassPipeline;
use crate::recovery::RawFailure;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};

/// One health measurement
#[derive(Debug, Clone)]
pub struct HealthSample {
    /// When the sample was taken
    pub timestamp: SystemTime,
    /// Probe round-trip time; infinite when the probe got no answer
    pub latency_ms: f64,
    /// Probe packet loss in percent
    pub loss_pct: f64,
    /// Fraction of bypass layers that verified healthy (1.0 = all)
    pub integrity: f64,
}

impl HealthSample {
    /// Whether this sample breaches the configured quality thresholds
    pub fn breaches(&self, cfg: &HealthConfig) -> bool {
        self.latency_ms > cfg.max_latency_ms || self.loss_pct > cfg.max_loss_pct
    }
}

/// Raw link quality measurement
#[derive(Debug, Clone, Copy)]
pub struct LinkStats {
    /// Average round-trip time in milliseconds
    pub latency_ms: f64,
    /// Packet loss in percent
    pub loss_pct: f64,
}

/// Samples link quality, typically by pinging a well-known host through the
/// tether
pub trait LinkProbe: Send + Sync {
    /// Take one measurement
    fn sample(&self) -> Result<LinkStats, RawFailure>;
}

/// Debounce check: the last `degraded_samples` entries must all breach
fn window_degraded(window: &VecDeque<HealthSample>, cfg: &HealthConfig) -> bool {
    let needed = cfg.degraded_samples as usize;
    if window.len() < needed {
        return false;
    }
    window.iter().rev().take(needed).all(|s| s.breaches(cfg))
}

struct MonitorShared {
    paused: AtomicBool,
    stop: AtomicBool,
    reset: AtomicBool,
    last_sample: Mutex<Option<HealthSample>>,
}

/// Handle to the sampling thread
pub struct HealthMonitor {
    shared: Arc<MonitorShared>,
    thread: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the sampling thread, initially paused.
    ///
    /// Crate-internal: the monitor only ever feeds the owner loop's queue.
    pub(crate) fn spawn(
        cfg: HealthConfig,
        probe: Arc<dyn LinkProbe>,
        pipeline: Arc<Mutex<BypassPipeline>>,
        events: Sender<OwnerEvent>,
    ) -> Self {
        let shared = Arc::new(MonitorShared {
            paused: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            reset: AtomicBool::new(false),
            last_sample: Mutex::new(None),
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("tveil-health".to_string())
            .spawn(move || run_loop(cfg, probe, pipeline, events, thread_shared))
            .expect("failed to spawn health monitor thread");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Resume sampling with a fresh window
    pub fn resume(&self) {
        self.shared.reset.store(true, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Pause sampling
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Whether the monitor is currently paused
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Most recent sample, if any was taken since spawn
    pub fn last_sample(&self) -> Option<HealthSample> {
        self.shared.last_sample.lock().clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop(
    cfg: HealthConfig,
    probe: Arc<dyn LinkProbe>,
    pipeline: Arc<Mutex<BypassPipeline>>,
    events: Sender<OwnerEvent>,
    shared: Arc<MonitorShared>,
) {
    let mut window: VecDeque<HealthSample> = VecDeque::with_capacity(cfg.window);
    let idle = Duration::from_millis(cfg.interval_ms.min(200));
    let interval = Duration::from_millis(cfg.interval_ms);

    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        if shared.paused.load(Ordering::SeqCst) {
            thread::sleep(idle);
            continue;
        }
        if shared.reset.swap(false, Ordering::SeqCst) {
            window.clear();
        }

        let stats = match probe.sample() {
            Ok(stats) => stats,
            Err(raw) => {
                debug!(failure = %raw, "link probe got no answer");
                LinkStats {
                    latency_ms: f64::INFINITY,
                    loss_pct: 100.0,
                }
            }
        };

        let (faults, total) = {
            let pipeline = pipeline.lock();
            (pipeline.verify_all(), pipeline.len())
        };
        let integrity = if total == 0 {
            1.0
        } else {
            (total - faults.len()) as f64 / total as f64
        };

        let sample = HealthSample {
            timestamp: SystemTime::now(),
            latency_ms: stats.latency_ms,
            loss_pct: stats.loss_pct,
            integrity,
        };
        trace!(
            latency_ms = sample.latency_ms,
            loss_pct = sample.loss_pct,
            integrity = sample.integrity,
            "health sample"
        );
        *shared.last_sample.lock() = Some(sample.clone());

        if window.len() == cfg.window {
            window.pop_front();
        }
        window.push_back(sample.clone());

        let layer_failed = !faults.is_empty();
        if layer_failed {
            for fault in &faults {
                warn!(layer = %fault.layer_id, failure = %fault.raw, "bypass layer unhealthy");
            }
        }

        if layer_failed || window_degraded(&window, &cfg) {
            warn!("connection degraded, notifying owner and pausing");
            shared.paused.store(true, Ordering::SeqCst);
            if events.send(OwnerEvent::Degraded(sample)).is_err() {
                // Owner is gone; nothing left to monitor for
                break;
            }
            continue;
        }

        // Sleep in slices so stop/pause are honored promptly
        let mut slept = Duration::ZERO;
        while slept < interval {
            if shared.stop.load(Ordering::SeqCst) || shared.paused.load(Ordering::SeqCst) {
                break;
            }
            let slice = idle.min(interval - slept);
            thread::sleep(slice);
            slept += slice;
        }
    }
}
