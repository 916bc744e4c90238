//! Environment preflight checks
//!
//! Backs the `doctor` command: verifies the privileged tools exist, the
//! process is root, and reports what it finds without changing anything.

use tveil_core::ops::{Operation, OperationRunner};

/// Outcome of one preflight check
#[derive(Debug, Clone)]
pub struct PreflightCheck {
    /// Short check name
    pub name: &'static str,
    /// Whether the environment satisfies the check
    pub ok: bool,
    /// Whether a failure blocks connecting (vs. informational)
    pub required: bool,
    /// Human-readable detail
    pub detail: String,
}

fn which(runner: &dyn OperationRunner, tool: &str) -> (bool, String) {
    let op = Operation::new(format!("which_{tool}"), "which").arg(tool).timeout_ms(5_000);
    match runner.run(&op) {
        Ok(output) if output.success() => (true, output.stdout.trim().to_string()),
        Ok(_) => (false, format!("{tool} not found in PATH")),
        Err(e) => (false, e.to_string()),
    }
}

/// Run every preflight check
pub fn run_preflight(runner: &dyn OperationRunner) -> Vec<PreflightCheck> {
    let mut checks = Vec::new();

    let uid_op = Operation::new("check_uid", "id").arg("-u").timeout_ms(5_000);
    let (is_root, detail) = match runner.run(&uid_op) {
        Ok(output) if output.success() => {
            let uid = output.stdout.trim().to_string();
            (uid == "0", format!("uid {uid}"))
        }
        Ok(output) => (false, format!("id -u failed: {}", output.stderr.trim())),
        Err(e) => (false, e.to_string()),
    };
    checks.push(PreflightCheck {
        name: "root privileges",
        ok: is_root,
        required: true,
        detail,
    });

    for (tool, required) in [
        ("ip", true),
        ("iptables", true),
        ("ip6tables", true),
        ("ping", true),
        ("tc", false),
        ("redsocks", false),
    ] {
        let (ok, detail) = which(runner, tool);
        checks.push(PreflightCheck {
            name: match tool {
                "ip" => "iproute2",
                "iptables" => "iptables",
                "ip6tables" => "ip6tables",
                "ping" => "ping",
                "tc" => "tc (traffic_shape layer)",
                _ => "redsocks (proxy_redirect layer)",
            },
            ok,
            required,
            detail,
        });
    }

    let nm_op = Operation::new("check_network_manager", "systemctl")
        .args(["is-active", "NetworkManager"])
        .timeout_ms(5_000);
    let (ok, detail) = match runner.run(&nm_op) {
        Ok(output) if output.success() => (true, "active".to_string()),
        Ok(_) => (true, "not active".to_string()),
        Err(e) => (false, e.to_string()),
    };
    checks.push(PreflightCheck {
        name: "NetworkManager status",
        ok,
        required: false,
        detail,
    });

    checks
}

/// Whether any required check failed
pub fn has_blocking_failure(checks: &[PreflightCheck]) -> bool {
    checks.iter().any(|c| c.required && !c.ok)
}
