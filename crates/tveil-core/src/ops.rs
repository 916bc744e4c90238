//! Privileged operation surface
//!
//! The core never runs shell commands itself. Everything privileged is
//! expressed as an [`Operation`] (a named program + argument vector with a
//! timeout) and handed to an [`OperationRunner`]. The runner captures the
//! outcome verbatim; interpreting it is the caller's job.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn default_timeout_ms() -> u64 {
    10_000
}

/// A named external command with arguments and an explicit timeout.
///
/// Arguments may contain `{placeholder}` markers that are substituted with
/// [`Operation::bind`] once the concrete values (interface name, gateway,
/// proxy port) are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Stable name used in logs and error-catalog signatures
    pub name: String,
    /// Program to execute
    pub program: String,
    /// Argument vector, possibly containing placeholders
    #[serde(default)]
    pub args: Vec<String>,
    /// Timeout in milliseconds; a run never blocks longer than this
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Operation {
    /// Create a new operation with the default timeout
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override the timeout
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Substitute `{key}` placeholders in the argument vector.
    ///
    /// Unknown placeholders are left untouched so a half-bound operation is
    /// visible in logs rather than silently mangled.
    pub fn bind(&self, vars: &[(&str, String)]) -> Self {
        let mut bound = self.clone();
        for arg in &mut bound.args {
            for (key, value) in vars {
                let marker = format!("{{{key}}}");
                if arg.contains(&marker) {
                    *arg = arg.replace(&marker, value);
                }
            }
        }
        bound
    }

    /// Render the full command line for logging
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured outcome of a single operation run
#[derive(Debug, Clone, Default)]
pub struct OperationOutput {
    /// Process exit code; `None` when killed by a signal or by the timeout
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether the run was aborted by its timeout
    pub timed_out: bool,
}

impl OperationOutput {
    /// Whether the operation completed with exit code zero
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Executes privileged operations on behalf of the core.
///
/// Implementations run the command, enforce the timeout and capture the
/// outcome; they never interpret it. A spawn failure (program missing,
/// permission denied on exec) is the only `Err` case - a nonzero exit or a
/// timeout is a captured, reportable outcome, not an executor error.
pub trait OperationRunner: Send + Sync {
    /// Run a single operation to completion or timeout
    fn run(&self, op: &Operation) -> Result<OperationOutput>;
}

/// Cooperative cancellation flag shared between the request surface and the
/// owner loop.
///
/// Cancellation is only ever observed between steps; an in-flight operation
/// always finishes (or times out) before the token takes effect.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new session
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_substitutes_placeholders() {
        let op = Operation::new("ttl_activate", "iptables")
            .args(["-t", "mangle", "-A", "POSTROUTING", "-o", "{iface}"]);
        let bound = op.bind(&[("iface", "usb0".to_string())]);
        assert_eq!(bound.args.last().unwrap(), "usb0");
        // Original is untouched
        assert_eq!(op.args.last().unwrap(), "{iface}");
    }

    #[test]
    fn test_bind_leaves_unknown_placeholders() {
        let op = Operation::new("x", "echo").arg("{mystery}");
        let bound = op.bind(&[("iface", "usb0".to_string())]);
        assert_eq!(bound.args[0], "{mystery}");
    }

    #[test]
    fn test_command_line() {
        let op = Operation::new("routes", "ip").args(["route", "show", "default"]);
        assert_eq!(op.command_line(), "ip route show default");
    }

    #[test]
    fn test_output_success() {
        let ok = OperationOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());

        let failed = OperationOutput {
            exit_code: Some(2),
            ..Default::default()
        };
        assert!(!failed.success());

        let timed_out = OperationOutput {
            exit_code: None,
            timed_out: true,
            ..Default::default()
        };
        assert!(!timed_out.success());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }
}
