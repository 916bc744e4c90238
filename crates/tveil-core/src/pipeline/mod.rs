//! Bypass layer pipeline
//!
//! Brings an ordered set of network-bypass layers up and down with
//! deterministic partial-failure behavior: activation is all-or-nothing (a
//! half-applied bypass is a detectable signature on the carrier side), while
//! deactivation is best-effort-complete (stale firewall state is worse than
//! an incomplete log).

mod layer;

pub use layer::{BypassLayer, LayerStatus};

use crate::catalog::LayerSpec;
use crate::ops::{CancelToken, OperationRunner};
use crate::recovery::RawFailure;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A failure attributed to one layer
#[derive(Debug, Clone)]
pub struct LayerFault {
    /// Layer the failure belongs to
    pub layer_id: String,
    /// The captured failure
    pub raw: RawFailure,
}

/// Result of an activation pass
#[derive(Debug, Clone)]
pub struct ActivationReport {
    /// Layers that were successfully activated before the pass ended
    pub activated: usize,
    /// The failure that stopped the pass, after rollback completed
    pub failure: Option<LayerFault>,
    /// Whether the pass was stopped by cooperative cancellation
    pub cancelled: bool,
}

impl ActivationReport {
    /// Whether every layer came up
    pub fn all_active(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

/// Result of a deactivation pass
#[derive(Debug, Clone)]
pub struct DeactivationReport {
    /// Layers whose deactivate operation was attempted
    pub attempted: usize,
    /// Layers that deactivated cleanly
    pub deactivated: usize,
    /// Every failure encountered; never aborts the pass
    pub failures: Vec<LayerFault>,
}

/// Ordered pipeline of bypass layers.
///
/// The pipeline holds at most one installed layer set at a time; the set is
/// installed on entering Connecting and cleared once the connection is gone.
/// Mutation is serialized by the owner loop; `verify_all` is the only entry
/// point other tasks may call, and it never mutates.
pub struct BypassPipeline {
    runner: Arc<dyn OperationRunner>,
    layers: Vec<BypassLayer>,
}

impl BypassPipeline {
    /// Create an empty pipeline
    pub fn new(runner: Arc<dyn OperationRunner>) -> Self {
        Self {
            runner,
            layers: Vec::new(),
        }
    }

    /// Install a bound layer set, replacing any previous one.
    ///
    /// Layers are kept in ascending ordinal order; deactivation walks the
    /// same list backwards.
    pub fn install(&mut self, specs: Vec<LayerSpec>) {
        let mut layers: Vec<BypassLayer> = specs.into_iter().map(BypassLayer::new).collect();
        layers.sort_by_key(BypassLayer::ordinal);
        debug!(count = layers.len(), "installed layer set");
        self.layers = layers;
    }

    /// Drop the installed layer set
    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// Whether a layer set is installed
    pub fn is_installed(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Number of installed layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the pipeline has no layers installed
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Installed layers in activation order
    pub fn layers(&self) -> &[BypassLayer] {
        &self.layers
    }

    /// Number of layers currently active
    pub fn active_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.status() == LayerStatus::Active)
            .count()
    }

    /// Activate every layer in ascending ordinal order.
    ///
    /// On the first failure, forward progress stops and every layer
    /// activated so far is deactivated again, in reverse order, before the
    /// failure is returned - the host is never left partially bypassed.
    ///
    /// Cancellation is honored between layers: the current layer finishes,
    /// no further layer starts, and already-active layers are left for the
    /// caller's deactivation pass (the caller asked to tear down anyway).
    pub fn activate_all(&mut self, cancel: &CancelToken) -> ActivationReport {
        let mut activated: Vec<usize> = Vec::new();

        for idx in 0..self.layers.len() {
            if cancel.is_cancelled() {
                info!(
                    activated = activated.len(),
                    "activation cancelled, stopping before next layer"
                );
                return ActivationReport {
                    activated: activated.len(),
                    failure: None,
                    cancelled: true,
                };
            }

            let op = self.layers[idx].spec().activate.clone();
            let layer_id = self.layers[idx].id().to_string();
            debug!(layer = %layer_id, command = %op.command_line(), "activating layer");

            let failure = match self.runner.run(&op) {
                Ok(output) if output.success() => {
                    self.layers[idx].set_status(LayerStatus::Active);
                    activated.push(idx);
                    None
                }
                Ok(output) => Some(RawFailure::from_output(&op, &output)),
                Err(e) => Some(RawFailure::from_error(op.name.clone(), &e)),
            };

            if let Some(raw) = failure {
                warn!(layer = %layer_id, failure = %raw, "layer activation failed, rolling back");
                self.layers[idx].set_status(LayerStatus::Failed);
                self.rollback(&activated);
                return ActivationReport {
                    activated: activated.len(),
                    failure: Some(LayerFault { layer_id, raw }),
                    cancelled: false,
                };
            }
        }

        info!(count = activated.len(), "all bypass layers active");
        ActivationReport {
            activated: activated.len(),
            failure: None,
            cancelled: false,
        }
    }

    /// Deactivate the prefix activated by a failed pass, newest first, and
    /// leave every layer Inactive.
    fn rollback(&mut self, activated: &[usize]) {
        for &idx in activated.iter().rev() {
            let op = self.layers[idx].spec().deactivate.clone();
            match self.runner.run(&op) {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    warn!(
                        layer = %self.layers[idx].id(),
                        failure = %RawFailure::from_output(&op, &output),
                        "rollback deactivation failed"
                    );
                }
                Err(e) => {
                    warn!(layer = %self.layers[idx].id(), error = %e, "rollback deactivation failed");
                }
            }
        }
        for layer in &mut self.layers {
            layer.set_status(LayerStatus::Inactive);
        }
    }

    /// Deactivate every installed layer, in exact reverse activation order.
    ///
    /// Every layer is attempted regardless of earlier failures and
    /// regardless of its recorded status - a layer the pipeline believes
    /// inactive may still have left rules behind. All failures are collected
    /// and reported; none aborts the pass.
    pub fn deactivate_all(&mut self) -> DeactivationReport {
        let mut report = DeactivationReport {
            attempted: 0,
            deactivated: 0,
            failures: Vec::new(),
        };

        for idx in (0..self.layers.len()).rev() {
            let op = self.layers[idx].spec().deactivate.clone();
            let layer_id = self.layers[idx].id().to_string();
            report.attempted += 1;
            debug!(layer = %layer_id, command = %op.command_line(), "deactivating layer");

            match self.runner.run(&op) {
                Ok(output) if output.success() => {
                    self.layers[idx].set_status(LayerStatus::Inactive);
                    report.deactivated += 1;
                }
                Ok(output) => {
                    self.layers[idx].set_status(LayerStatus::Failed);
                    report.failures.push(LayerFault {
                        layer_id,
                        raw: RawFailure::from_output(&op, &output),
                    });
                }
                Err(e) => {
                    self.layers[idx].set_status(LayerStatus::Failed);
                    report.failures.push(LayerFault {
                        layer_id,
                        raw: RawFailure::from_error(op.name.clone(), &e),
                    });
                }
            }
        }

        if report.failures.is_empty() {
            info!(count = report.deactivated, "all bypass layers deactivated");
        } else {
            warn!(
                deactivated = report.deactivated,
                failed = report.failures.len(),
                "teardown finished with failures"
            );
        }
        report
    }

    /// Check every active layer and report the unhealthy ones.
    ///
    /// Read-only: statuses are not touched, only reported. Layers that are
    /// not active are skipped - their rules are not supposed to be present.
    pub fn verify_all(&self) -> Vec<LayerFault> {
        let mut faults = Vec::new();
        for layer in &self.layers {
            if layer.status() != LayerStatus::Active {
                continue;
            }
            let op = &layer.spec().verify;
            match self.runner.run(op) {
                Ok(output) if output.success() => {}
                Ok(output) => faults.push(LayerFault {
                    layer_id: layer.id().to_string(),
                    raw: RawFailure::from_output(op, &output),
                }),
                Err(e) => faults.push(LayerFault {
                    layer_id: layer.id().to_string(),
                    raw: RawFailure::from_error(op.name.clone(), &e),
                }),
            }
        }
        faults
    }

    /// Run one layer's verify operation, regardless of recorded status.
    ///
    /// Used by recovery re-verification after an auto-fix.
    pub fn verify_layer(&self, layer_id: &str) -> Result<(), RawFailure> {
        let Some(layer) = self.layers.iter().find(|l| l.id() == layer_id) else {
            return Err(RawFailure::signal(
                "verify_layer",
                format!("layer '{layer_id}' is not installed"),
            ));
        };
        let op = &layer.spec().verify;
        match self.runner.run(op) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(RawFailure::from_output(op, &output)),
            Err(e) => Err(RawFailure::from_error(op.name.clone(), &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::ops::{Operation, OperationOutput};
    use parking_lot::Mutex;

    /// Runner that fails operations whose name is on the deny list and logs
    /// every invocation.
    struct ScriptedRunner {
        fail: Vec<String>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                log: Mutex::new(Vec::new()),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl OperationRunner for ScriptedRunner {
        fn run(&self, op: &Operation) -> Result<OperationOutput> {
            self.log.lock().push(op.name.clone());
            if self.fail.contains(&op.name) {
                Ok(OperationOutput {
                    exit_code: Some(1),
                    stderr: "scripted failure".to_string(),
                    ..Default::default()
                })
            } else {
                Ok(OperationOutput {
                    exit_code: Some(0),
                    ..Default::default()
                })
            }
        }
    }

    fn spec(id: &str, ordinal: u16) -> LayerSpec {
        LayerSpec {
            id: id.to_string(),
            ordinal,
            activate: Operation::new(format!("{id}_act"), "true"),
            deactivate: Operation::new(format!("{id}_deact"), "true"),
            verify: Operation::new(format!("{id}_verify"), "true"),
        }
    }

    fn pipeline_with(runner: Arc<ScriptedRunner>, n: usize) -> BypassPipeline {
        let mut p = BypassPipeline::new(runner);
        p.install((0..n).map(|i| spec(&format!("l{}", i + 1), (i as u16 + 1) * 10)).collect());
        p
    }

    #[test]
    fn test_activate_all_success() {
        let runner = Arc::new(ScriptedRunner::new(&[]));
        let mut p = pipeline_with(runner.clone(), 3);
        let report = p.activate_all(&CancelToken::new());
        assert!(report.all_active());
        assert_eq!(report.activated, 3);
        assert_eq!(p.active_count(), 3);
        assert_eq!(runner.log(), ["l1_act", "l2_act", "l3_act"]);
    }

    #[test]
    fn test_activation_failure_rolls_back_in_reverse() {
        let runner = Arc::new(ScriptedRunner::new(&["l3_act"]));
        let mut p = pipeline_with(runner.clone(), 4);
        let report = p.activate_all(&CancelToken::new());

        assert_eq!(report.activated, 2);
        assert_eq!(report.failure.as_ref().unwrap().layer_id, "l3");
        // Forward 1, 2, 3(fail), then rollback 2, 1; layer 4 never touched
        assert_eq!(
            runner.log(),
            ["l1_act", "l2_act", "l3_act", "l2_deact", "l1_deact"]
        );
        assert!(p.layers().iter().all(|l| l.status() == LayerStatus::Inactive));
    }

    #[test]
    fn test_cancelled_activation_stops_without_rollback() {
        let runner = Arc::new(ScriptedRunner::new(&[]));
        let mut p = pipeline_with(runner.clone(), 4);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = p.activate_all(&cancel);
        assert!(report.cancelled);
        assert_eq!(report.activated, 0);
        assert!(runner.log().is_empty());
    }

    #[test]
    fn test_deactivate_all_attempts_every_layer() {
        let runner = Arc::new(ScriptedRunner::new(&["l2_deact"]));
        let mut p = pipeline_with(runner.clone(), 3);
        p.activate_all(&CancelToken::new());
        runner.log.lock().clear();

        let report = p.deactivate_all();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.deactivated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].layer_id, "l2");
        // Reverse order, no early abort
        assert_eq!(runner.log(), ["l3_deact", "l2_deact", "l1_deact"]);
    }

    #[test]
    fn test_verify_all_skips_inactive_layers() {
        let runner = Arc::new(ScriptedRunner::new(&["l1_verify"]));
        let p = pipeline_with(runner.clone(), 2);
        // Nothing active yet: no verify calls at all
        assert!(p.verify_all().is_empty());
        assert!(runner.log().is_empty());
    }

    #[test]
    fn test_verify_all_reports_unhealthy_layers() {
        let runner = Arc::new(ScriptedRunner::new(&["l2_verify"]));
        let mut p = pipeline_with(runner.clone(), 3);
        p.activate_all(&CancelToken::new());

        let faults = p.verify_all();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].layer_id, "l2");
        // Statuses untouched
        assert_eq!(p.active_count(), 3);
    }

    #[test]
    fn test_verify_layer_missing() {
        let runner = Arc::new(ScriptedRunner::new(&[]));
        let p = BypassPipeline::new(runner);
        assert!(p.verify_layer("ghost").is_err());
    }
}
