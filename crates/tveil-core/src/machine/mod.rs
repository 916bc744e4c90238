//! Connection state machine
//!
//! The top-level controller. A single owner thread drives the whole
//! lifecycle - discovery, proxy validation, layer activation, monitoring,
//! recovery, teardown - and is the only writer of [`ConnectionState`].
//! Requests and health events arrive over one queue and are processed
//! strictly in order; nothing else mutates shared state.

mod events;

pub use events::{ConnectionState, EventSink, Notification, NullSink, RequestOutcome};

use crate::catalog::{ErrorCatalog, LayerCatalog, LayerSpec};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::{HealthMonitor, HealthSample, LinkProbe};
use crate::ops::{CancelToken, OperationRunner};
use crate::pipeline::BypassPipeline;
use crate::proxy::ProxyProbe;
use crate::recovery::{ErrorClassifier, ErrorRecord, RawFailure, RecoveryEngine, RecoveryOutcome};
use crate::resolver::{DiscoveryCatalog, InterfaceInfo, InterfaceResolver};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Events consumed by the owner loop
#[derive(Debug)]
pub(crate) enum OwnerEvent {
    Connect,
    Disconnect,
    Degraded(HealthSample),
    Shutdown,
}

/// Everything the state machine is built from.
///
/// Constructed once at startup and passed in explicitly - there are no
/// ambient singletons anywhere in the core.
pub struct Components {
    /// Executes privileged operations
    pub runner: Arc<dyn OperationRunner>,
    /// Interface/route discovery operations
    pub discovery: DiscoveryCatalog,
    /// Ordered bypass layer templates
    pub layers: LayerCatalog,
    /// Failure signature catalog
    pub errors: ErrorCatalog,
    /// Upstream proxy validator
    pub proxy: Box<dyn ProxyProbe>,
    /// Link quality probe for the health monitor
    pub link: Arc<dyn LinkProbe>,
}

struct Shared {
    state: Mutex<ConnectionState>,
    cond: Condvar,
    last_error: Mutex<Option<ErrorRecord>>,
}

/// Cloneable request surface for the connection manager.
///
/// Requests are answered immediately: a request that cannot be processed in
/// the current state comes back [`RequestOutcome::Busy`] rather than being
/// queued behind the transition in flight.
#[derive(Clone)]
pub struct ConnectionRequester {
    tx: Sender<OwnerEvent>,
    shared: Arc<Shared>,
    cancel: CancelToken,
}

impl ConnectionRequester {
    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// The last classified error of the current/previous session
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.shared.last_error.lock().clone()
    }

    /// Request a connection
    pub fn connect(&self) -> RequestOutcome {
        let state = self.state();
        match state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                if self.tx.send(OwnerEvent::Connect).is_ok() {
                    RequestOutcome::Accepted
                } else {
                    RequestOutcome::Busy(state)
                }
            }
            ConnectionState::Connected => RequestOutcome::Ignored,
            other => RequestOutcome::Busy(other),
        }
    }

    /// Request a disconnect.
    ///
    /// While Connecting or ErrorRecovery this is honored cooperatively: the
    /// in-flight step finishes, then everything activated so far is torn
    /// down. Partial state is never abandoned.
    pub fn disconnect(&self) -> RequestOutcome {
        let state = self.state();
        match state {
            ConnectionState::Connected => {
                if self.tx.send(OwnerEvent::Disconnect).is_ok() {
                    RequestOutcome::Accepted
                } else {
                    RequestOutcome::Busy(state)
                }
            }
            ConnectionState::Connecting
            | ConnectionState::ErrorRecovery
            | ConnectionState::Error => {
                self.cancel.cancel();
                let _ = self.tx.send(OwnerEvent::Disconnect);
                RequestOutcome::Accepted
            }
            ConnectionState::Disconnecting => RequestOutcome::Busy(state),
            ConnectionState::Disconnected => RequestOutcome::Ignored,
        }
    }

    /// Block until the state satisfies `pred` or the timeout passes;
    /// returns the state seen last
    pub fn wait_for<F>(&self, pred: F, timeout: Duration) -> ConnectionState
    where
        F: Fn(ConnectionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !pred(*state) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = self.shared.cond.wait_for(&mut state, remaining);
        }
        *state
    }

    /// Block until the machine settles in Connected or Disconnected
    pub fn wait_until_settled(&self, timeout: Duration) -> ConnectionState {
        self.wait_for(
            |s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected),
            timeout,
        )
    }
}

/// Owning handle to a running connection manager.
///
/// Dropping the handle shuts the owner thread down, tearing down any active
/// bypass state first.
pub struct ConnectionHandle {
    requester: ConnectionRequester,
    thread: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// A cloneable request surface, e.g. for signal handlers
    pub fn requester(&self) -> ConnectionRequester {
        self.requester.clone()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.requester.state()
    }

    /// The last classified error of the current/previous session
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.requester.last_error()
    }

    /// Request a connection
    pub fn connect(&self) -> RequestOutcome {
        self.requester.connect()
    }

    /// Request a disconnect
    pub fn disconnect(&self) -> RequestOutcome {
        self.requester.disconnect()
    }

    /// Block until the state satisfies `pred` or the timeout passes
    pub fn wait_for<F>(&self, pred: F, timeout: Duration) -> ConnectionState
    where
        F: Fn(ConnectionState) -> bool,
    {
        self.requester.wait_for(pred, timeout)
    }

    /// Block until the machine settles in Connected or Disconnected
    pub fn wait_until_settled(&self, timeout: Duration) -> ConnectionState {
        self.requester.wait_until_settled(timeout)
    }

    /// Stop the manager, disconnecting first if necessary
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.requester.tx.send(OwnerEvent::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

enum ConnectError {
    Cancelled,
    Failed { raw: RawFailure, recheck: Recheck },
}

/// How to re-run the original failing check after an auto-fix
enum Recheck {
    Resolve,
    Proxy(InterfaceInfo),
    Layer(String),
    Link,
}

enum Disposition {
    Retry,
    GiveUp,
}

/// The connection state machine and its owner loop
pub struct ConnectionManager {
    config: Config,
    resolver: InterfaceResolver,
    proxy: Box<dyn ProxyProbe>,
    link: Arc<dyn LinkProbe>,
    pipeline: Arc<Mutex<BypassPipeline>>,
    classifier: ErrorClassifier,
    engine: RecoveryEngine,
    monitor: HealthMonitor,
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
    rx: Receiver<OwnerEvent>,
    cancel: CancelToken,
    specs: Vec<LayerSpec>,
    iface: Option<InterfaceInfo>,
    fix_attempts: HashMap<String, u32>,
    reconnects: u32,
}

impl ConnectionManager {
    /// Validate the configuration, wire the components together and start
    /// the owner thread.
    pub fn spawn(
        config: Config,
        components: Components,
        sink: Arc<dyn EventSink>,
    ) -> Result<ConnectionHandle> {
        config.validate()?;

        let Components {
            runner,
            discovery,
            layers,
            errors,
            proxy,
            link,
        } = components;

        let specs: Vec<LayerSpec> = layers
            .layers()
            .iter()
            .filter(|spec| config.layers.enabled(&spec.id))
            .cloned()
            .collect();
        if specs.is_empty() {
            return Err(Error::Config(
                "layer catalog and [layers] toggles leave no layer enabled".to_string(),
            ));
        }

        let pipeline = Arc::new(Mutex::new(BypassPipeline::new(runner.clone())));
        let (tx, rx) = mpsc::channel();
        let monitor =
            HealthMonitor::spawn(config.health.clone(), link.clone(), pipeline.clone(), tx.clone());
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            cond: Condvar::new(),
            last_error: Mutex::new(None),
        });
        let cancel = CancelToken::new();
        let resolver = InterfaceResolver::new(
            runner.clone(),
            discovery,
            config.general.interface,
            config.general.proxy_port,
        );

        let manager = Self {
            config,
            resolver,
            proxy,
            link,
            pipeline,
            classifier: ErrorClassifier::new(errors),
            engine: RecoveryEngine::new(runner),
            monitor,
            sink,
            shared: shared.clone(),
            rx,
            cancel: cancel.clone(),
            specs,
            iface: None,
            fix_attempts: HashMap::new(),
            reconnects: 0,
        };

        let thread = thread::Builder::new()
            .name("tveil-conn".to_string())
            .spawn(move || manager.run())
            .map_err(Error::Io)?;

        Ok(ConnectionHandle {
            requester: ConnectionRequester { tx, shared, cancel },
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        debug!("connection manager started");
        while let Ok(event) = self.rx.recv() {
            match event {
                OwnerEvent::Connect => match self.state() {
                    ConnectionState::Disconnected | ConnectionState::Error => {
                        self.connect_session();
                    }
                    state => trace!(%state, "connect request has no transition here, ignored"),
                },
                OwnerEvent::Disconnect => match self.state() {
                    ConnectionState::Connected | ConnectionState::Error => {
                        self.monitor.pause();
                        self.finish_disconnect();
                    }
                    state => trace!(%state, "disconnect request has no transition here, ignored"),
                },
                OwnerEvent::Degraded(sample) => {
                    if self.state() == ConnectionState::Connected {
                        self.handle_degradation(sample);
                    } else {
                        trace!("stale degradation event ignored");
                    }
                }
                OwnerEvent::Shutdown => {
                    if self.state() != ConnectionState::Disconnected {
                        self.monitor.pause();
                        self.finish_disconnect();
                    }
                    break;
                }
            }
        }
        debug!("connection manager stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    fn set_state(&self, new: ConnectionState) {
        let old = {
            let mut state = self.shared.state.lock();
            let old = *state;
            if old == new {
                return;
            }
            *state = new;
            old
        };
        self.shared.cond.notify_all();
        info!(%old, %new, "connection state changed");
        self.sink.emit(&Notification::StateChanged { old, new });
    }

    /// Start a fresh user-initiated session: budgets reset, cancel cleared.
    fn connect_session(&mut self) {
        self.cancel.reset();
        self.fix_attempts.clear();
        self.reconnects = 0;
        *self.shared.last_error.lock() = None;
        self.connect_loop();
    }

    /// Drive connect attempts until Connected, cancelled or out of budget.
    fn connect_loop(&mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            self.teardown_stale();

            match self.try_connect() {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    self.monitor.resume();
                    return;
                }
                Err(ConnectError::Cancelled) => {
                    info!("connect cancelled by disconnect request");
                    self.finish_disconnect();
                    return;
                }
                Err(ConnectError::Failed { raw, recheck }) => {
                    match self.handle_failure(raw, recheck) {
                        Disposition::Retry => continue,
                        Disposition::GiveUp => {
                            self.finish_disconnect();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One connect attempt. Cancellation is checked between phases and
    /// between layers, never mid-operation.
    fn try_connect(&mut self) -> std::result::Result<(), ConnectError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        let iface = self.resolver.resolve().map_err(|raw| ConnectError::Failed {
            raw,
            recheck: Recheck::Resolve,
        })?;
        self.iface = Some(iface.clone());
        self.sink.emit(&Notification::InterfaceResolved(iface.clone()));

        if self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        self.proxy.check(&iface).map_err(|raw| ConnectError::Failed {
            raw,
            recheck: Recheck::Proxy(iface.clone()),
        })?;

        if self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        let bound: Vec<LayerSpec> = self.specs.iter().map(|spec| spec.bind(&iface)).collect();
        let report = {
            let mut pipeline = self.pipeline.lock();
            pipeline.install(bound);
            pipeline.activate_all(&self.cancel)
        };

        if report.cancelled {
            return Err(ConnectError::Cancelled);
        }
        if let Some(fault) = report.failure {
            // Layers stay installed (all inactive) so recovery can still run
            // the failed layer's verify operation.
            return Err(ConnectError::Failed {
                raw: fault.raw,
                recheck: Recheck::Layer(fault.layer_id),
            });
        }

        Ok(())
    }

    /// Decide what a classified failure means for the session.
    fn handle_failure(&mut self, raw: RawFailure, recheck: Recheck) -> Disposition {
        let mut record = self.classifier.classify(&raw);
        if let Some(iface) = &self.iface {
            record = record.bind(iface);
        }
        self.set_state(ConnectionState::Error);
        *self.shared.last_error.lock() = Some(record.clone());

        if self.cancel.is_cancelled() {
            return Disposition::GiveUp;
        }

        let attempts = self.fix_attempts.get(&record.code).copied().unwrap_or(0);
        if record.auto_fix_available() && attempts < self.config.recovery.max_fix_attempts {
            self.set_state(ConnectionState::ErrorRecovery);
            *self.fix_attempts.entry(record.code.clone()).or_insert(0) += 1;

            let attempt = self.engine.recover(&record, || self.run_recheck(&recheck));
            self.sink.emit(&Notification::RecoveryAttempted(attempt.clone()));

            match attempt.outcome {
                RecoveryOutcome::Resolved => {
                    info!(code = %record.code, "recovery resolved, reconnecting");
                    return Disposition::Retry;
                }
                _ => {
                    record.remediation_attempted = true;
                    *self.shared.last_error.lock() = Some(record.clone());
                    warn!(code = %record.code, "auto-fix did not stick, surfacing manual steps");
                    return Disposition::GiveUp;
                }
            }
        }

        if !record.auto_fix_available() {
            // Surface the manual path before any blind retry
            let attempt = self.engine.recover(&record, || false);
            self.sink.emit(&Notification::RecoveryAttempted(attempt));
        }

        if self.config.general.auto_reconnect
            && self.reconnects < self.config.recovery.max_reconnect_attempts
        {
            self.reconnects += 1;
            let delay = self.backoff_delay(self.reconnects);
            info!(
                attempt = self.reconnects,
                budget = self.config.recovery.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying connection"
            );
            if !self.sleep_unless_cancelled(delay) {
                return Disposition::GiveUp;
            }
            return Disposition::Retry;
        }

        warn!(code = %record.code, "reconnect budget exhausted, giving up");
        Disposition::GiveUp
    }

    /// Re-run the check that originally failed.
    fn run_recheck(&self, recheck: &Recheck) -> bool {
        match recheck {
            Recheck::Resolve => self.resolver.resolve().is_ok(),
            Recheck::Proxy(iface) => self.proxy.check(iface).is_ok(),
            Recheck::Layer(id) => self.pipeline.lock().verify_layer(id).is_ok(),
            Recheck::Link => match self.link.sample() {
                Ok(stats) => {
                    stats.latency_ms <= self.config.health.max_latency_ms
                        && stats.loss_pct <= self.config.health.max_loss_pct
                }
                Err(_) => false,
            },
        }
    }

    /// Connected -> Error after a health event.
    fn handle_degradation(&mut self, sample: HealthSample) {
        warn!(
            latency_ms = sample.latency_ms,
            loss_pct = sample.loss_pct,
            integrity = sample.integrity,
            "health monitor reported degradation"
        );
        self.sink.emit(&Notification::HealthDegraded(sample.clone()));

        let faults = self.pipeline.lock().verify_all();
        let (raw, recheck) = match faults.into_iter().next() {
            Some(fault) => {
                let recheck = Recheck::Layer(fault.layer_id.clone());
                (fault.raw, recheck)
            }
            None => (
                RawFailure::signal(
                    "link_quality",
                    format!(
                        "latency {:.0} ms, loss {:.0}%",
                        sample.latency_ms, sample.loss_pct
                    ),
                ),
                Recheck::Link,
            ),
        };

        match self.handle_failure(raw, recheck) {
            Disposition::Retry => self.connect_loop(),
            Disposition::GiveUp => self.finish_disconnect(),
        }
    }

    /// Tear down whatever a previous attempt left behind before activating
    /// a fresh layer set.
    fn teardown_stale(&mut self) {
        let mut pipeline = self.pipeline.lock();
        if pipeline.is_installed() {
            if pipeline.active_count() > 0 {
                let report = pipeline.deactivate_all();
                for fault in &report.failures {
                    warn!(layer = %fault.layer_id, failure = %fault.raw, "stale layer teardown failed");
                }
            }
            pipeline.clear();
        }
        drop(pipeline);
        self.iface = None;
    }

    /// Disconnecting -> Disconnected. Teardown always runs to completion;
    /// its failures are logged, never re-entered as errors.
    fn finish_disconnect(&mut self) {
        self.monitor.pause();
        self.set_state(ConnectionState::Disconnecting);
        self.teardown_stale();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Exponential back-off with jitter so retries against the phone never
    /// synchronize.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.recovery.backoff_ms;
        let max = self.config.recovery.max_backoff_ms;
        let exp = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
        let capped = exp.min(max);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((capped as f64 * jitter) as u64)
    }

    /// Sleep in slices, bailing out if a disconnect arrives meanwhile.
    /// Returns false when cancelled.
    fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(Duration::from_millis(25)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        // Only the shape matters here; jitter makes exact values moot
        let base = 100u64;
        let max = 1_000u64;
        for attempt in 1..=10u32 {
            let exp = base.saturating_mul(1u64 << (attempt - 1).min(10));
            assert!(exp.min(max) <= max);
        }
    }
}
