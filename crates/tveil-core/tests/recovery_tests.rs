//! Integration tests for the recovery engine
//!
//! The contract under test: `Resolved` is only ever reported after the
//! original failing check was re-run and passed.

use mockall::predicate::function;
use mockall::Sequence;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tveil_core::error::{ErrorCategory, Result};
use tveil_core::ops::{Operation, OperationOutput, OperationRunner};
use tveil_core::recovery::{ErrorRecord, RawFailure, RecoveryEngine, RecoveryOutcome};

mockall::mock! {
    Runner {}

    impl OperationRunner for Runner {
        fn run(&self, op: &Operation) -> Result<OperationOutput>;
    }
}

fn output(exit_code: i32) -> OperationOutput {
    OperationOutput {
        exit_code: Some(exit_code),
        ..Default::default()
    }
}

fn record(auto_fix: Option<Operation>, recheck: Option<Operation>) -> ErrorRecord {
    ErrorRecord {
        code: "proxy_stuck".to_string(),
        category: ErrorCategory::Network,
        message: "proxy wedged".to_string(),
        auto_fix,
        recheck,
        manual_steps: vec!["restart the phone app".to_string()],
        source: RawFailure::signal("validate_proxy", "no answer"),
        remediation_attempted: false,
    }
}

#[test]
fn resolved_requires_passing_recheck() {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .with(function(|op: &Operation| op.name == "restart_proxy"))
        .times(1)
        .returning(|_| Ok(output(0)));

    let engine = RecoveryEngine::new(Arc::new(runner));
    let record = record(Some(Operation::new("restart_proxy", "systemctl")), None);

    let rechecked = Arc::new(AtomicBool::new(false));
    let flag = rechecked.clone();
    let attempt = engine.recover(&record, move || {
        flag.store(true, Ordering::SeqCst);
        true
    });

    assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
    assert!(attempt.attempted_auto_fix);
    assert!(rechecked.load(Ordering::SeqCst), "recheck must actually run");
}

#[test]
fn persisting_condition_is_failed_not_resolved() {
    let mut runner = MockRunner::new();
    runner.expect_run().times(1).returning(|_| Ok(output(0)));

    let engine = RecoveryEngine::new(Arc::new(runner));
    let record = record(Some(Operation::new("restart_proxy", "systemctl")), None);

    // Fix action succeeded, but the world is still broken
    let attempt = engine.recover(&record, || false);
    assert_eq!(attempt.outcome, RecoveryOutcome::Failed);
    assert!(attempt.attempted_auto_fix);
}

#[test]
fn failed_fix_action_skips_recheck() {
    let mut runner = MockRunner::new();
    runner.expect_run().times(1).returning(|_| Ok(output(1)));

    let engine = RecoveryEngine::new(Arc::new(runner));
    let record = record(Some(Operation::new("restart_proxy", "systemctl")), None);

    let attempt = engine.recover(&record, || panic!("recheck must not run after a failed fix"));
    assert_eq!(attempt.outcome, RecoveryOutcome::Failed);
    assert!(attempt.attempted_auto_fix);
}

#[test]
fn no_fix_escalates_without_touching_the_runner() {
    // Zero expectations: any run() call panics the test
    let runner = MockRunner::new();
    let engine = RecoveryEngine::new(Arc::new(runner));
    let record = record(None, None);

    let attempt = engine.recover(&record, || panic!("nothing to re-verify"));
    assert_eq!(attempt.outcome, RecoveryOutcome::Escalated);
    assert!(!attempt.attempted_auto_fix);
    assert_eq!(attempt.record.manual_steps, ["restart the phone app"]);
}

#[test]
fn catalog_recheck_takes_precedence_over_closure() {
    let mut runner = MockRunner::new();
    let mut seq = Sequence::new();
    runner
        .expect_run()
        .with(function(|op: &Operation| op.name == "restart_proxy"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(output(0)));
    runner
        .expect_run()
        .with(function(|op: &Operation| op.name == "probe_proxy"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(output(0)));

    let engine = RecoveryEngine::new(Arc::new(runner));
    let record = record(
        Some(Operation::new("restart_proxy", "systemctl")),
        Some(Operation::new("probe_proxy", "curl")),
    );

    let attempt = engine.recover(&record, || panic!("closure recheck must be ignored"));
    assert_eq!(attempt.outcome, RecoveryOutcome::Resolved);
}

#[test]
fn failing_catalog_recheck_is_failed() {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .with(function(|op: &Operation| op.name == "restart_proxy"))
        .times(1)
        .returning(|_| Ok(output(0)));
    runner
        .expect_run()
        .with(function(|op: &Operation| op.name == "probe_proxy"))
        .times(1)
        .returning(|_| Ok(output(7)));

    let engine = RecoveryEngine::new(Arc::new(runner));
    let record = record(
        Some(Operation::new("restart_proxy", "systemctl")),
        Some(Operation::new("probe_proxy", "curl")),
    );

    let attempt = engine.recover(&record, || true);
    assert_eq!(attempt.outcome, RecoveryOutcome::Failed);
}
