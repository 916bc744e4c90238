//! Configuration profiles
//!
//! Maps named presets to full configurations. Profiles differ mainly in
//! which bypass layers they enable and how twitchy the health monitor is.

use super::*;
use serde::{Deserialize, Serialize};

/// Predefined configuration profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Balanced default: TTL clamp, IPv6 block, DNS redirect, proxy redirect
    Standard,
    /// Least interference: TTL clamp and proxy redirect only, slow to
    /// declare degradation. For carriers that choke on DNS or IPv6 changes.
    Compat,
    /// Everything on, including traffic shaping, with a tight health watch
    Paranoid,
    /// Layer set taken verbatim from the `[layers]` section
    Custom,
}

impl Profile {
    /// Convert profile to full configuration
    pub fn into_config(self) -> Config {
        let mut config = Config::default();
        config.profile = Some(self);

        match self {
            Profile::Standard => {
                config.layers.ttl_clamp = true;
                config.layers.ipv6_block = true;
                config.layers.dns_redirect = true;
                config.layers.proxy_redirect = true;
                config.layers.traffic_shape = false;
            }
            Profile::Compat => {
                config.layers.ttl_clamp = true;
                config.layers.ipv6_block = false;
                config.layers.dns_redirect = false;
                config.layers.proxy_redirect = true;
                config.layers.traffic_shape = false;
                config.health.degraded_samples = 5;
                config.health.max_latency_ms = 1_500.0;
            }
            Profile::Paranoid => {
                config.layers.ttl_clamp = true;
                config.layers.ipv6_block = true;
                config.layers.dns_redirect = true;
                config.layers.proxy_redirect = true;
                config.layers.traffic_shape = true;
                config.health.interval_ms = 3_000;
                config.health.degraded_samples = 2;
            }
            Profile::Custom => {}
        }

        config
    }

    /// Parse a profile name as given on the command line
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "compat" => Some(Self::Compat),
            "paranoid" => Some(Self::Paranoid),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}
