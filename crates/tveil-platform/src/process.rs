//! Operation execution over std::process
//!
//! Runs each privileged command with captured output and a hard deadline.
//! A child that outlives its timeout is killed and reported as timed out;
//! the caller never blocks indefinitely on a wedged tool.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tveil_core::error::{Error, Result};
use tveil_core::ops::{Operation, OperationOutput, OperationRunner};

/// Poll interval while waiting for a child to finish
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Runs operations as local processes.
///
/// Stdout/stderr are drained on dedicated reader threads so a chatty child
/// can never fill its pipes and deadlock against our wait loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ShellRunner {
    /// Create a runner
    pub fn new() -> Self {
        Self
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_string(&mut buf);
        }
        buf
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(None);
                }
                thread::sleep(WAIT_SLICE);
            }
        }
    }
}

impl OperationRunner for ShellRunner {
    fn run(&self, op: &Operation) -> Result<OperationOutput> {
        debug!(operation = %op.name, command = %op.command_line(), "running operation");

        let mut child = Command::new(&op.program)
            .args(&op.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::spawn(op.name.clone(), e.to_string()))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit = wait_with_deadline(&mut child, Duration::from_millis(op.timeout_ms))?;

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        match exit {
            Some(status) => {
                debug!(operation = %op.name, exit_code = ?status.code(), "operation finished");
                Ok(OperationOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                })
            }
            None => {
                warn!(operation = %op.name, timeout_ms = op.timeout_ms, "operation timed out, killed");
                Ok(OperationOutput {
                    exit_code: None,
                    stdout,
                    stderr,
                    timed_out: true,
                })
            }
        }
    }
}
