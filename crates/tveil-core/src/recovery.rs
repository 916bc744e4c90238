//! Error classification and recovery
//!
//! Every executor or validator failure is folded into a [`RawFailure`],
//! classified against the error catalog into an [`ErrorRecord`], and - when a
//! declared-safe fix exists - handed to the [`RecoveryEngine`]. The engine
//! never reports `Resolved` on the fix action's exit status alone: the
//! original failing condition is always re-checked first.

use crate::catalog::ErrorCatalog;
use crate::error::{Error, ErrorCategory};
use crate::ops::{Operation, OperationOutput, OperationRunner};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Unclassified failure as captured at the point of occurrence
#[derive(Debug, Clone)]
pub struct RawFailure {
    /// Name of the operation (or validator signal) that failed
    pub operation: String,
    /// Exit code, when the failure came from a finished process
    pub exit_code: Option<i32>,
    /// Captured stderr, or a validator-supplied detail string
    pub stderr: String,
    /// Whether the operation was aborted by its timeout
    pub timed_out: bool,
}

impl RawFailure {
    /// Capture a non-success operation output
    pub fn from_output(op: &Operation, output: &OperationOutput) -> Self {
        Self {
            operation: op.name.clone(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
            timed_out: output.timed_out,
        }
    }

    /// Capture an executor error (spawn failure, I/O trouble)
    pub fn from_error(operation: impl Into<String>, err: &Error) -> Self {
        Self {
            operation: operation.into(),
            exit_code: None,
            stderr: err.to_string(),
            timed_out: false,
        }
    }

    /// Capture a validator-specific signal that has no process behind it
    pub fn signal(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            exit_code: None,
            stderr: detail.into(),
            timed_out: false,
        }
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if self.timed_out {
            write!(f, " timed out")?;
        } else if let Some(code) = self.exit_code {
            write!(f, " exited with {code}")?;
        }
        if !self.stderr.is_empty() {
            write!(f, ": {}", self.stderr)?;
        }
        Ok(())
    }
}

/// A classified failure, ready to be surfaced or remediated
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Stable error code from the catalog, or `unknown_failure`
    pub code: String,
    /// Taxonomy bucket
    pub category: ErrorCategory,
    /// Human-readable description
    pub message: String,
    /// Declared-safe remediation, if the catalog knows one
    pub auto_fix: Option<Operation>,
    /// Catalog-declared re-verification check, if any
    pub recheck: Option<Operation>,
    /// Manual steps for the caller when automation is out
    pub manual_steps: Vec<String>,
    /// The failure this record was built from
    pub source: RawFailure,
    /// Set once an auto-fix was tried and did not stick, so the caller does
    /// not re-trigger an identical failed fix
    pub remediation_attempted: bool,
}

impl ErrorRecord {
    /// Whether the catalog declared an automated fix for this error
    pub fn auto_fix_available(&self) -> bool {
        self.auto_fix.is_some()
    }

    /// Bind interface placeholders in the fix and recheck operations
    pub fn bind(mut self, iface: &crate::resolver::InterfaceInfo) -> Self {
        let vars = iface.bind_vars();
        self.auto_fix = self.auto_fix.map(|op| op.bind(&vars));
        self.recheck = self.recheck.map(|op| op.bind(&vars));
        self
    }
}

/// Maps raw failures to catalog entries
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    catalog: ErrorCatalog,
}

impl ErrorClassifier {
    /// Create a classifier over the given catalog
    pub fn new(catalog: ErrorCatalog) -> Self {
        Self { catalog }
    }

    /// Classify a raw failure.
    ///
    /// Unknown failures classify to `System` with no auto-fix, so nothing is
    /// ever silently swallowed.
    pub fn classify(&self, raw: &RawFailure) -> ErrorRecord {
        match self.catalog.lookup(raw) {
            Some(entry) => {
                debug!(code = %entry.code, failure = %raw, "classified failure");
                ErrorRecord {
                    code: entry.code.clone(),
                    category: entry.category,
                    message: entry.message.clone(),
                    auto_fix: entry.auto_fix.clone(),
                    recheck: entry.recheck.clone(),
                    manual_steps: entry.manual_steps.clone(),
                    source: raw.clone(),
                    remediation_attempted: false,
                }
            }
            None => {
                debug!(failure = %raw, "failure matched no catalog entry");
                ErrorRecord {
                    code: "unknown_failure".to_string(),
                    category: ErrorCategory::System,
                    message: format!("Unrecognized failure: {raw}"),
                    auto_fix: None,
                    recheck: None,
                    manual_steps: vec![],
                    source: raw.clone(),
                    remediation_attempted: false,
                }
            }
        }
    }
}

/// Outcome of one recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Fix applied and the original condition re-verified as gone
    Resolved,
    /// Fix action failed, or the condition persisted after it
    Failed,
    /// No automated fix exists; manual steps are the only path
    Escalated,
}

/// Record of one recovery attempt
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    /// The error this attempt was made for
    pub record: ErrorRecord,
    /// Whether an auto-fix action was actually executed
    pub attempted_auto_fix: bool,
    /// What came of it
    pub outcome: RecoveryOutcome,
}

/// Runs declared-safe fixes and verifies they actually took effect
pub struct RecoveryEngine {
    runner: Arc<dyn OperationRunner>,
}

impl RecoveryEngine {
    /// Create an engine over the given runner
    pub fn new(runner: Arc<dyn OperationRunner>) -> Self {
        Self { runner }
    }

    /// Attempt recovery for a classified error.
    ///
    /// `recheck` re-runs the original failing check; it is consulted only
    /// when the record carries no catalog-declared recheck operation.
    /// `Resolved` is reported strictly after a passing re-verification,
    /// never on the fix action's own success.
    pub fn recover<F>(&self, record: &ErrorRecord, recheck: F) -> RecoveryAttempt
    where
        F: Fn() -> bool,
    {
        let Some(fix) = &record.auto_fix else {
            info!(code = %record.code, "no auto-fix available, escalating to manual steps");
            return RecoveryAttempt {
                record: record.clone(),
                attempted_auto_fix: false,
                outcome: RecoveryOutcome::Escalated,
            };
        };

        info!(code = %record.code, fix = %fix.name, "attempting auto-fix");
        let fix_ok = match self.runner.run(fix) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(
                    code = %record.code,
                    fix = %fix.name,
                    exit_code = ?output.exit_code,
                    "auto-fix action failed"
                );
                false
            }
            Err(e) => {
                warn!(code = %record.code, fix = %fix.name, error = %e, "auto-fix could not run");
                false
            }
        };

        if !fix_ok {
            return RecoveryAttempt {
                record: record.clone(),
                attempted_auto_fix: true,
                outcome: RecoveryOutcome::Failed,
            };
        }

        let verified = match &record.recheck {
            Some(op) => match self.runner.run(op) {
                Ok(output) => output.success(),
                Err(e) => {
                    warn!(code = %record.code, check = %op.name, error = %e, "recheck could not run");
                    false
                }
            },
            None => recheck(),
        };

        let outcome = if verified {
            info!(code = %record.code, "auto-fix verified, error resolved");
            RecoveryOutcome::Resolved
        } else {
            warn!(code = %record.code, "condition persisted after auto-fix");
            RecoveryOutcome::Failed
        };

        RecoveryAttempt {
            record: record.clone(),
            attempted_auto_fix: true,
            outcome,
        }
    }
}
