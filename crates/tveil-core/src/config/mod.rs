//! Configuration management for TetherVeil
//!
//! Provides a strongly-typed configuration system with TOML support and
//! profile-based presets. The orchestrator treats a loaded `Config` as an
//! immutable snapshot for the lifetime of a connection session.

mod profile;

pub use profile::Profile;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,

    /// General connection settings
    pub general: GeneralConfig,

    /// Health monitor settings
    pub health: HealthConfig,

    /// Retry and auto-fix settings
    pub recovery: RecoveryConfig,

    /// Bypass layer toggles
    pub layers: LayersConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: None,
            general: GeneralConfig::default(),
            health: HealthConfig::default(),
            recovery: RecoveryConfig::default(),
            layers: LayersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Create configuration from a preset profile
    pub fn from_profile(profile: Profile) -> Self {
        profile.into_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.general.proxy_port == 0 {
            return Err(Error::InvalidPort {
                port: u32::from(self.general.proxy_port),
            });
        }

        if self.health.window == 0 {
            return Err(Error::config_value("health.window", "must be non-zero"));
        }
        if self.health.degraded_samples == 0 {
            return Err(Error::config_value(
                "health.degraded_samples",
                "must be non-zero",
            ));
        }
        if (self.health.degraded_samples as usize) > self.health.window {
            return Err(Error::config_value(
                "health.degraded_samples",
                "cannot exceed health.window",
            ));
        }
        if self.health.interval_ms < 500 {
            return Err(Error::config_value(
                "health.interval_ms",
                "must be at least 500",
            ));
        }

        if self.recovery.backoff_ms == 0 {
            return Err(Error::config_value("recovery.backoff_ms", "must be non-zero"));
        }
        if self.recovery.max_backoff_ms < self.recovery.backoff_ms {
            return Err(Error::config_value(
                "recovery.max_backoff_ms",
                "cannot be smaller than recovery.backoff_ms",
            ));
        }

        if !self.layers.any_enabled() {
            return Err(Error::Config(
                "at least one bypass layer must be enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Which tethering interface kind to bring up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfacePreference {
    /// Use whatever tethering interface is up, USB preferred
    #[default]
    Auto,
    /// USB tethering only
    Usb,
    /// WiFi hotspot only
    Wifi,
}

/// General connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Reconnect automatically after failures and degradation
    pub auto_reconnect: bool,
    /// Interface kind preference
    pub interface: InterfacePreference,
    /// TCP port of the HTTP proxy on the phone
    pub proxy_port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            interface: InterfacePreference::Auto,
            proxy_port: 8000,
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Sampling interval in milliseconds
    pub interval_ms: u64,
    /// Rolling window size in samples
    pub window: usize,
    /// Consecutive breaching samples required to declare degradation
    pub degraded_samples: u32,
    /// Latency above this is a breach (milliseconds)
    pub max_latency_ms: f64,
    /// Packet loss above this is a breach (percent)
    pub max_loss_pct: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            window: 12,
            degraded_samples: 3,
            max_latency_ms: 800.0,
            max_loss_pct: 40.0,
        }
    }
}

/// Retry and auto-fix settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum automatic reconnect attempts after a failed or degraded
    /// connection, per session
    pub max_reconnect_attempts: u32,
    /// Base reconnect back-off in milliseconds (doubles per attempt)
    pub backoff_ms: u64,
    /// Upper bound on the back-off in milliseconds
    pub max_backoff_ms: u64,
    /// Maximum auto-fix attempts per error code, per session
    pub max_fix_attempts: u32,
    /// Optional path to a TOML error catalog overriding the built-in one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            max_fix_attempts: 2,
            catalog: None,
        }
    }
}

/// Bypass layer toggles
///
/// Each flag corresponds to a layer id in the layer catalog. Layers from a
/// custom catalog file that have no flag here are enabled by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayersConfig {
    /// Clamp outgoing TTL to the phone's native value
    pub ttl_clamp: bool,
    /// Drop IPv6 egress on the tether interface
    pub ipv6_block: bool,
    /// Redirect DNS queries to the phone's resolver
    pub dns_redirect: bool,
    /// Redirect TCP through the phone's HTTP proxy
    pub proxy_redirect: bool,
    /// Shape egress to a phone-like traffic profile
    pub traffic_shape: bool,
    /// Optional path to a TOML layer catalog overriding the built-in one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self {
            ttl_clamp: true,
            ipv6_block: true,
            dns_redirect: true,
            proxy_redirect: true,
            traffic_shape: false,
            catalog: None,
        }
    }
}

impl LayersConfig {
    /// Whether the layer with the given catalog id is enabled
    pub fn enabled(&self, id: &str) -> bool {
        match id {
            "ttl_clamp" => self.ttl_clamp,
            "ipv6_block" => self.ipv6_block,
            "dns_redirect" => self.dns_redirect,
            "proxy_redirect" => self.proxy_redirect,
            "traffic_shape" => self.traffic_shape,
            _ => true,
        }
    }

    /// Whether any builtin layer is enabled
    pub fn any_enabled(&self) -> bool {
        self.ttl_clamp
            || self.ipv6_block
            || self.dns_redirect
            || self.proxy_redirect
            || self.traffic_shape
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when no verbosity flags are given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
