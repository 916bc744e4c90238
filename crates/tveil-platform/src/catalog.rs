//! Default catalogs for Linux
//!
//! The concrete privileged commands behind every bypass layer, the
//! discovery operations, and the failure signatures the classifier matches
//! against. The core treats all of this as opaque configuration; users can
//! replace the layer catalog with their own TOML file.

use once_cell::sync::Lazy;
use tveil_core::catalog::{CatalogEntry, ErrorCatalog, LayerCatalog, LayerSpec, Signature};
use tveil_core::error::ErrorCategory;
use tveil_core::ops::Operation;
use tveil_core::resolver::DiscoveryCatalog;

/// Local port redsocks listens on for redirected TCP
const REDSOCKS_PORT: &str = "12345";

fn rule_op(name: &str, program: &str, prefix: &[&str], flag: &str, rule: &[&str]) -> Operation {
    Operation::new(name, program)
        .args(prefix.iter().copied())
        .arg(flag)
        .args(rule.iter().copied())
        .timeout_ms(5_000)
}

/// An iptables-style layer: same rule text behind -A / -D / -C.
fn rule_layer(
    id: &str,
    ordinal: u16,
    program: &str,
    prefix: &[&str],
    chain_and_rule: &[&str],
) -> LayerSpec {
    LayerSpec {
        id: id.to_string(),
        ordinal,
        activate: rule_op(&format!("{id}_activate"), program, prefix, "-A", chain_and_rule),
        deactivate: rule_op(&format!("{id}_deactivate"), program, prefix, "-D", chain_and_rule),
        verify: rule_op(&format!("{id}_verify"), program, prefix, "-C", chain_and_rule),
    }
}

fn ttl_clamp() -> LayerSpec {
    // 65 = phone TTL + 1, so packets leave the phone with its native TTL
    rule_layer(
        "ttl_clamp",
        10,
        "iptables",
        &["-t", "mangle"],
        &["POSTROUTING", "-o", "{iface}", "-j", "TTL", "--ttl-set", "65"],
    )
}

fn ipv6_block() -> LayerSpec {
    // Carriers fingerprint tethering via IPv6 the phone itself never uses
    rule_layer(
        "ipv6_block",
        20,
        "ip6tables",
        &[],
        &["OUTPUT", "-o", "{iface}", "-j", "DROP"],
    )
}

fn dns_redirect() -> LayerSpec {
    rule_layer(
        "dns_redirect",
        30,
        "iptables",
        &["-t", "nat"],
        &[
            "OUTPUT", "-o", "{iface}", "-p", "udp", "--dport", "53", "-j", "DNAT",
            "--to-destination", "{gateway}:53",
        ],
    )
}

fn proxy_redirect() -> LayerSpec {
    // Outbound TCP loops through redsocks, which forwards to the phone's
    // HTTP proxy; headers then look like the phone's own browser traffic
    rule_layer(
        "proxy_redirect",
        40,
        "iptables",
        &["-t", "nat"],
        &[
            "OUTPUT", "-o", "{iface}", "-p", "tcp", "--syn", "-j", "REDIRECT", "--to-ports",
            REDSOCKS_PORT,
        ],
    )
}

fn traffic_shape() -> LayerSpec {
    LayerSpec {
        id: "traffic_shape".to_string(),
        ordinal: 50,
        activate: Operation::new("traffic_shape_activate", "tc")
            .args([
                "qdisc", "add", "dev", "{iface}", "root", "tbf", "rate", "12mbit", "burst",
                "32kbit", "latency", "400ms",
            ])
            .timeout_ms(5_000),
        deactivate: Operation::new("traffic_shape_deactivate", "tc")
            .args(["qdisc", "del", "dev", "{iface}", "root"])
            .timeout_ms(5_000),
        verify: Operation::new("traffic_shape_verify", "sh")
            .args(["-c", "tc qdisc show dev {iface} | grep -q tbf"])
            .timeout_ms(5_000),
    }
}

static DEFAULT_LAYERS: Lazy<LayerCatalog> = Lazy::new(|| {
    LayerCatalog::new(vec![
        ttl_clamp(),
        ipv6_block(),
        dns_redirect(),
        proxy_redirect(),
        traffic_shape(),
    ])
    .expect("builtin layer catalog is valid")
});

/// The builtin Linux bypass layer catalog
pub fn default_layer_catalog() -> LayerCatalog {
    DEFAULT_LAYERS.clone()
}

/// Discovery operations for Linux (iproute2)
pub fn default_discovery_catalog() -> DiscoveryCatalog {
    DiscoveryCatalog {
        list_links: Operation::new("list_links", "ip")
            .args(["-o", "link", "show", "up"])
            .timeout_ms(5_000),
        default_routes: Operation::new("default_routes", "ip")
            .args(["-4", "route", "show", "default"])
            .timeout_ms(5_000),
    }
}

fn entry(
    code: &str,
    category: ErrorCategory,
    message: &str,
    matches: Vec<Signature>,
    auto_fix: Option<Operation>,
    recheck: Option<Operation>,
    manual_steps: &[&str],
) -> CatalogEntry {
    CatalogEntry {
        code: code.to_string(),
        category,
        message: message.to_string(),
        matches,
        auto_fix,
        recheck,
        manual_steps: manual_steps.iter().map(|s| s.to_string()).collect(),
    }
}

fn stderr_sig(needle: &str) -> Signature {
    Signature {
        stderr_contains: Some(needle.to_string()),
        ..Default::default()
    }
}

fn op_sig(operation: &str) -> Signature {
    Signature {
        operation: Some(operation.to_string()),
        ..Default::default()
    }
}

static DEFAULT_ERRORS: Lazy<ErrorCatalog> = Lazy::new(|| {
    ErrorCatalog::new(vec![
        entry(
            "missing_privilege",
            ErrorCategory::System,
            "Privileged network commands require root",
            vec![
                stderr_sig("permission denied"),
                stderr_sig("you must be root"),
                stderr_sig("operation not permitted"),
            ],
            None,
            None,
            &["Run tetherveil as root (sudo tetherveil connect)"],
        ),
        entry(
            "tool_missing",
            ErrorCategory::System,
            "A required external tool is not installed",
            vec![
                stderr_sig("no such file or directory"),
                stderr_sig("command not found"),
            ],
            None,
            None,
            &[
                "Install iptables, ip6tables, iproute2 and tc",
                "Re-run 'tetherveil doctor' to confirm",
            ],
        ),
        entry(
            "tether_interface_missing",
            ErrorCategory::Network,
            "No tethering interface is up",
            vec![op_sig("resolve_interface")],
            None,
            None,
            &[
                "Plug the phone in over USB and enable USB tethering, or join its hotspot",
                "Check 'ip link' for a usb0/rndis0/enx* interface",
            ],
        ),
        entry(
            "tether_gateway_missing",
            ErrorCategory::Network,
            "Tethering interface has no default route",
            vec![op_sig("resolve_gateway")],
            // Interface details are unknown at this point, so the fix must
            // not rely on placeholders; kicking NetworkManager re-runs DHCP
            // on every managed interface.
            Some(
                Operation::new("restart_network_manager", "systemctl")
                    .args(["restart", "NetworkManager"])
                    .timeout_ms(30_000),
            ),
            None,
            &[
                "Renew the DHCP lease on the tethering interface",
                "Toggle tethering off and on again on the phone",
            ],
        ),
        entry(
            "proxy_unreachable",
            ErrorCategory::Network,
            "The phone-side proxy did not answer",
            vec![
                Signature {
                    operation: Some("validate_proxy".to_string()),
                    stderr_contains: Some("connect".to_string()),
                    ..Default::default()
                },
                Signature {
                    operation: Some("validate_proxy".to_string()),
                    stderr_contains: Some("closed the connection".to_string()),
                    ..Default::default()
                },
            ],
            None,
            None,
            &[
                "Open the tethering app on the phone and confirm its proxy is running",
                "Check the proxy port in the configuration matches the app",
            ],
        ),
        entry(
            "redsocks_down",
            ErrorCategory::System,
            "redsocks is not accepting redirected connections",
            vec![
                Signature {
                    operation: Some("proxy_redirect_verify".to_string()),
                    ..Default::default()
                },
                stderr_sig("redsocks"),
            ],
            Some(
                Operation::new("restart_redsocks", "systemctl")
                    .args(["restart", "redsocks"])
                    .timeout_ms(20_000),
            ),
            Some(
                Operation::new("check_redsocks", "systemctl")
                    .args(["is-active", "--quiet", "redsocks"])
                    .timeout_ms(5_000),
            ),
            &[
                "systemctl status redsocks",
                "Check /etc/redsocks.conf points at the phone proxy",
            ],
        ),
        entry(
            "nat_table_busy",
            ErrorCategory::System,
            "The kernel NAT table rejected the rule change",
            vec![stderr_sig("resource temporarily unavailable"), stderr_sig("xtables lock")],
            Some(
                Operation::new("flush_tveil_nat", "iptables")
                    .args(["-t", "nat", "-F", "OUTPUT"])
                    .timeout_ms(10_000),
            ),
            None,
            &["Wait for other firewall tools to finish, then reconnect"],
        ),
        entry(
            "operation_timeout",
            ErrorCategory::System,
            "A privileged command hung past its deadline",
            vec![Signature {
                timed_out: true,
                ..Default::default()
            }],
            None,
            None,
            &["Check system load and whether NetworkManager is fighting over the interface"],
        ),
        entry(
            "link_degraded",
            ErrorCategory::Network,
            "Link quality through the tether collapsed",
            vec![op_sig("link_quality")],
            Some(
                Operation::new("bounce_interface", "sh")
                    .args(["-c", "ip link set {iface} down && ip link set {iface} up"])
                    .timeout_ms(15_000),
            ),
            None,
            &[
                "Move the phone somewhere with better signal",
                "Replace the USB cable if latency spikes persist",
            ],
        ),
    ])
});

/// The builtin failure-signature catalog
pub fn default_error_catalog() -> ErrorCatalog {
    DEFAULT_ERRORS.clone()
}
