//! Tethering interface discovery
//!
//! Finds the active tethering interface (USB or WiFi) and the phone-side
//! gateway the proxy lives on. The discovery commands themselves are opaque
//! operations supplied by the platform; this module only interprets their
//! output.

use crate::config::InterfacePreference;
use crate::ops::{Operation, OperationOutput, OperationRunner};
use crate::recovery::RawFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Kind of tethering link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// USB tethering (RNDIS / CDC ethernet)
    Usb,
    /// WiFi hotspot
    Wifi,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => f.write_str("USB"),
            Self::Wifi => f.write_str("WiFi"),
        }
    }
}

/// A discovered tethering endpoint.
///
/// Captured once per connection attempt and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name, e.g. `usb0` or `wlan0`
    pub name: String,
    /// USB or WiFi
    pub kind: InterfaceKind,
    /// Phone-side gateway address
    pub gateway: IpAddr,
    /// TCP port of the HTTP proxy on the gateway
    pub proxy_port: u16,
}

impl InterfaceInfo {
    /// Placeholder substitutions for operations bound to this interface
    pub fn bind_vars(&self) -> [(&'static str, String); 3] {
        [
            ("iface", self.name.clone()),
            ("gateway", self.gateway.to_string()),
            ("proxy_port", self.proxy_port.to_string()),
        ]
    }
}

impl fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) via {}:{}",
            self.name, self.kind, self.gateway, self.proxy_port
        )
    }
}

/// Discovery operations supplied by the platform
#[derive(Debug, Clone)]
pub struct DiscoveryCatalog {
    /// Lists interfaces that are up, one per line (`ip -o link show up`)
    pub list_links: Operation,
    /// Lists IPv4 default routes (`ip -4 route show default`)
    pub default_routes: Operation,
}

/// Discovers the tethering interface and gateway
pub struct InterfaceResolver {
    runner: Arc<dyn OperationRunner>,
    discovery: DiscoveryCatalog,
    preference: InterfacePreference,
    proxy_port: u16,
}

impl InterfaceResolver {
    /// Create a resolver
    pub fn new(
        runner: Arc<dyn OperationRunner>,
        discovery: DiscoveryCatalog,
        preference: InterfacePreference,
        proxy_port: u16,
    ) -> Self {
        Self {
            runner,
            discovery,
            preference,
            proxy_port,
        }
    }

    /// Discover the active tethering interface and its gateway.
    ///
    /// USB wins over WiFi when both are up and the preference allows either.
    pub fn resolve(&self) -> Result<InterfaceInfo, RawFailure> {
        let links = self.run(&self.discovery.list_links)?;
        let mut candidates: Vec<(String, InterfaceKind)> = parse_links(&links.stdout)
            .into_iter()
            .filter(|(_, kind)| self.preference_allows(*kind))
            .collect();
        candidates.sort_by_key(|(_, kind)| match kind {
            InterfaceKind::Usb => 0,
            InterfaceKind::Wifi => 1,
        });

        if candidates.is_empty() {
            return Err(RawFailure::signal(
                "resolve_interface",
                "no tethering-capable interface is up",
            ));
        }
        debug!(candidates = ?candidates, "tethering interface candidates");

        let routes = self.run(&self.discovery.default_routes)?;
        let routes = parse_default_routes(&routes.stdout);

        for (name, kind) in &candidates {
            if let Some(route) = routes.iter().find(|r| r.dev == *name) {
                let info = InterfaceInfo {
                    name: name.clone(),
                    kind: *kind,
                    gateway: route.gateway,
                    proxy_port: self.proxy_port,
                };
                info!(interface = %info, "resolved tethering interface");
                return Ok(info);
            }
        }

        let names: Vec<&str> = candidates.iter().map(|(n, _)| n.as_str()).collect();
        Err(RawFailure::signal(
            "resolve_gateway",
            format!("no default route through {}", names.join(", ")),
        ))
    }

    fn preference_allows(&self, kind: InterfaceKind) -> bool {
        match self.preference {
            InterfacePreference::Auto => true,
            InterfacePreference::Usb => kind == InterfaceKind::Usb,
            InterfacePreference::Wifi => kind == InterfaceKind::Wifi,
        }
    }

    fn run(&self, op: &Operation) -> Result<OperationOutput, RawFailure> {
        match self.runner.run(op) {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => Err(RawFailure::from_output(op, &output)),
            Err(e) => Err(RawFailure::from_error(op.name.clone(), &e)),
        }
    }
}

/// Classify an interface name as a tethering link kind.
///
/// USB tethers show up as `usb*`, `rndis*`, `enx<mac>` or predictable names
/// with a USB path component (`enp0s20u1`); hotspots as `wlan*`/`wlp*`/`wlx*`.
pub fn classify_link_name(name: &str) -> Option<InterfaceKind> {
    if name.starts_with("usb") || name.starts_with("rndis") || name.starts_with("enx") {
        return Some(InterfaceKind::Usb);
    }
    if name.starts_with("enp") && name.contains('u') {
        return Some(InterfaceKind::Usb);
    }
    if name.starts_with("wlan") || name.starts_with("wlp") || name.starts_with("wlx") {
        return Some(InterfaceKind::Wifi);
    }
    None
}

/// Parse `ip -o link show up` output into tethering candidates
fn parse_links(stdout: &str) -> Vec<(String, InterfaceKind)> {
    let mut found = Vec::new();
    for line in stdout.lines() {
        // "3: usb0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 ..."
        let mut parts = line.splitn(3, ':');
        let _index = parts.next();
        let Some(raw_name) = parts.next() else { continue };
        let name = raw_name.trim();
        // VLAN/peer suffix: "eth0@if2" -> "eth0"
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            continue;
        }
        if let Some(kind) = classify_link_name(name) {
            found.push((name.to_string(), kind));
        }
    }
    found
}

struct RouteEntry {
    gateway: IpAddr,
    dev: String,
}

/// Parse `ip -4 route show default` output
fn parse_default_routes(stdout: &str) -> Vec<RouteEntry> {
    let mut routes = Vec::new();
    for line in stdout.lines() {
        // "default via 192.168.42.129 dev usb0 proto dhcp metric 100"
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut gateway = None;
        let mut dev = None;
        for window in tokens.windows(2) {
            match window[0] {
                "via" => gateway = window[1].parse::<IpAddr>().ok(),
                "dev" => dev = Some(window[1].to_string()),
                _ => {}
            }
        }
        if let (Some(gateway), Some(dev)) = (gateway, dev) {
            routes.push(RouteEntry { gateway, dev });
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CoreResult;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeRunner {
        outputs: Mutex<HashMap<String, String>>,
    }

    impl FakeRunner {
        fn new(outputs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(
                    outputs
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
            })
        }
    }

    impl OperationRunner for FakeRunner {
        fn run(&self, op: &Operation) -> CoreResult<OperationOutput> {
            let stdout = self.outputs.lock().get(&op.name).cloned().unwrap_or_default();
            Ok(OperationOutput {
                exit_code: Some(0),
                stdout,
                ..Default::default()
            })
        }
    }

    fn discovery() -> DiscoveryCatalog {
        DiscoveryCatalog {
            list_links: Operation::new("list_links", "ip").args(["-o", "link", "show", "up"]),
            default_routes: Operation::new("default_routes", "ip")
                .args(["-4", "route", "show", "default"]),
        }
    }

    #[test]
    fn test_classify_link_names() {
        assert_eq!(classify_link_name("usb0"), Some(InterfaceKind::Usb));
        assert_eq!(classify_link_name("rndis0"), Some(InterfaceKind::Usb));
        assert_eq!(classify_link_name("enx0a1b2c3d4e5f"), Some(InterfaceKind::Usb));
        assert_eq!(classify_link_name("enp0s20u1"), Some(InterfaceKind::Usb));
        assert_eq!(classify_link_name("wlan0"), Some(InterfaceKind::Wifi));
        assert_eq!(classify_link_name("wlp3s0"), Some(InterfaceKind::Wifi));
        assert_eq!(classify_link_name("eth0"), None);
        assert_eq!(classify_link_name("lo"), None);
        assert_eq!(classify_link_name("enp3s0"), None);
    }

    #[test]
    fn test_parse_links_strips_peer_suffix() {
        let out = "2: eth0@if2: <UP> mtu 1500\n3: usb0: <UP> mtu 1500\n";
        let links = parse_links(out);
        assert_eq!(links, vec![("usb0".to_string(), InterfaceKind::Usb)]);
    }

    #[test]
    fn test_resolve_prefers_usb() {
        let runner = FakeRunner::new(&[
            (
                "list_links",
                "2: wlan0: <UP> mtu 1500\n3: usb0: <UP> mtu 1500\n",
            ),
            (
                "default_routes",
                "default via 192.168.42.129 dev usb0 proto dhcp metric 100\n\
                 default via 10.0.0.1 dev wlan0 proto dhcp metric 600\n",
            ),
        ]);
        let resolver =
            InterfaceResolver::new(runner, discovery(), InterfacePreference::Auto, 8000);
        let info = resolver.resolve().unwrap();
        assert_eq!(info.name, "usb0");
        assert_eq!(info.kind, InterfaceKind::Usb);
        assert_eq!(info.gateway.to_string(), "192.168.42.129");
        assert_eq!(info.proxy_port, 8000);
    }

    #[test]
    fn test_resolve_honors_wifi_preference() {
        let runner = FakeRunner::new(&[
            (
                "list_links",
                "2: wlan0: <UP> mtu 1500\n3: usb0: <UP> mtu 1500\n",
            ),
            (
                "default_routes",
                "default via 192.168.42.129 dev usb0\ndefault via 10.0.0.1 dev wlan0\n",
            ),
        ]);
        let resolver =
            InterfaceResolver::new(runner, discovery(), InterfacePreference::Wifi, 8000);
        let info = resolver.resolve().unwrap();
        assert_eq!(info.name, "wlan0");
        assert_eq!(info.kind, InterfaceKind::Wifi);
    }

    #[test]
    fn test_resolve_no_interface() {
        let runner = FakeRunner::new(&[("list_links", "1: lo: <LOOPBACK,UP> mtu 65536\n")]);
        let resolver =
            InterfaceResolver::new(runner, discovery(), InterfacePreference::Auto, 8000);
        let err = resolver.resolve().unwrap_err();
        assert_eq!(err.operation, "resolve_interface");
    }

    #[test]
    fn test_resolve_no_route() {
        let runner = FakeRunner::new(&[
            ("list_links", "3: usb0: <UP> mtu 1500\n"),
            ("default_routes", "default via 10.0.0.1 dev eth0\n"),
        ]);
        let resolver =
            InterfaceResolver::new(runner, discovery(), InterfacePreference::Auto, 8000);
        let err = resolver.resolve().unwrap_err();
        assert_eq!(err.operation, "resolve_gateway");
        assert!(err.stderr.contains("usb0"));
    }
}
