//! Layer and error catalogs
//!
//! Both catalogs are configuration data, not logic: the layer catalog is the
//! ordered list of bypass capabilities the pipeline drives, and the error
//! catalog maps failure signatures to categories and remediation. Either can
//! be loaded from TOML to override the platform defaults.

use crate::error::{Error, ErrorCategory, Result};
use crate::ops::Operation;
use crate::recovery::RawFailure;
use crate::resolver::InterfaceInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Template for one bypass layer.
///
/// The three operations may carry `{iface}`, `{gateway}` and `{proxy_port}`
/// placeholders; [`LayerSpec::bind`] resolves them against a discovered
/// interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Stable layer id, referenced by `[layers]` toggles and error records
    pub id: String,
    /// Activation order; deactivation runs in exact reverse
    pub ordinal: u16,
    /// Brings the layer up
    pub activate: Operation,
    /// Tears the layer down
    pub deactivate: Operation,
    /// Read-only check that the layer is still in place
    pub verify: Operation,
}

impl LayerSpec {
    /// Substitute interface details into the layer's operations
    pub fn bind(&self, iface: &InterfaceInfo) -> Self {
        let vars = iface.bind_vars();
        Self {
            id: self.id.clone(),
            ordinal: self.ordinal,
            activate: self.activate.bind(&vars),
            deactivate: self.deactivate.bind(&vars),
            verify: self.verify.bind(&vars),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LayerCatalogFile {
    layers: Vec<LayerSpec>,
}

/// Ordered collection of layer templates
#[derive(Debug, Clone)]
pub struct LayerCatalog {
    layers: Vec<LayerSpec>,
}

impl LayerCatalog {
    /// Build a catalog, validating ids and ordinals
    pub fn new(mut layers: Vec<LayerSpec>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::catalog("layer catalog is empty"));
        }
        layers.sort_by_key(|l| l.ordinal);
        for pair in layers.windows(2) {
            if pair[0].ordinal == pair[1].ordinal {
                return Err(Error::catalog(format!(
                    "layers '{}' and '{}' share ordinal {}",
                    pair[0].id, pair[1].id, pair[0].ordinal
                )));
            }
        }
        let mut ids: Vec<&str> = layers.iter().map(|l| l.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::catalog(format!("duplicate layer id '{}'", dup[0])));
        }
        Ok(Self { layers })
    }

    /// Load a catalog from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse a catalog from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: LayerCatalogFile = toml::from_str(content)?;
        Self::new(file.layers)
    }

    /// Layer templates in ascending ordinal order
    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the catalog holds no layers
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// One failure signature an error-catalog entry matches on.
///
/// All populated fields must match; a signature with every field empty
/// matches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    /// Match the operation name exactly
    pub operation: Option<String>,
    /// Match the exit code exactly
    pub exit_code: Option<i32>,
    /// Match a substring of stderr (case-insensitive)
    pub stderr_contains: Option<String>,
    /// Require the failure to be a timeout
    pub timed_out: bool,
}

impl Signature {
    /// Whether this signature matches a raw failure
    pub fn matches(&self, raw: &RawFailure) -> bool {
        if self.operation.is_none()
            && self.exit_code.is_none()
            && self.stderr_contains.is_none()
            && !self.timed_out
        {
            return false;
        }
        if let Some(ref op) = self.operation {
            if raw.operation != *op {
                return false;
            }
        }
        if let Some(code) = self.exit_code {
            if raw.exit_code != Some(code) {
                return false;
            }
        }
        if let Some(ref needle) = self.stderr_contains {
            let haystack = raw.stderr.to_ascii_lowercase();
            if !haystack.contains(&needle.to_ascii_lowercase()) {
                return false;
            }
        }
        if self.timed_out && !raw.timed_out {
            return false;
        }
        true
    }
}

/// One entry of the error catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable error code
    pub code: String,
    /// Failure taxonomy bucket
    pub category: ErrorCategory,
    /// Human-readable description
    pub message: String,
    /// Signatures that classify into this entry (any-of)
    #[serde(default)]
    pub matches: Vec<Signature>,
    /// Declared-safe, idempotent remediation, if one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<Operation>,
    /// Check run after the fix to confirm the condition is gone.
    /// When absent, the recovery engine re-runs the original failing check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recheck: Option<Operation>,
    /// Manual steps surfaced when automation is unavailable or failed
    #[serde(default)]
    pub manual_steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorCatalogFile {
    errors: Vec<CatalogEntry>,
}

/// Static mapping of failure signatures to classification and remediation
#[derive(Debug, Clone, Default)]
pub struct ErrorCatalog {
    entries: Vec<CatalogEntry>,
}

impl ErrorCatalog {
    /// Build a catalog from entries; first matching entry wins on lookup
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Load a catalog from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse a catalog from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ErrorCatalogFile = toml::from_str(content)?;
        Ok(Self::new(file.errors))
    }

    /// Find the first entry matching the raw failure
    pub fn lookup(&self, raw: &RawFailure) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.matches.iter().any(|sig| sig.matches(raw)))
    }

    /// All entries, in lookup order
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, ordinal: u16) -> LayerSpec {
        LayerSpec {
            id: id.to_string(),
            ordinal,
            activate: Operation::new(format!("{id}_activate"), "true"),
            deactivate: Operation::new(format!("{id}_deactivate"), "true"),
            verify: Operation::new(format!("{id}_verify"), "true"),
        }
    }

    #[test]
    fn test_layer_catalog_sorts_by_ordinal() {
        let catalog = LayerCatalog::new(vec![spec("b", 20), spec("a", 10)]).unwrap();
        let ids: Vec<_> = catalog.layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_layer_catalog_rejects_duplicate_ordinal() {
        let err = LayerCatalog::new(vec![spec("a", 10), spec("b", 10)]).unwrap_err();
        assert!(err.to_string().contains("ordinal"));
    }

    #[test]
    fn test_layer_catalog_rejects_duplicate_id() {
        assert!(LayerCatalog::new(vec![spec("a", 10), spec("a", 20)]).is_err());
    }

    #[test]
    fn test_layer_catalog_from_toml() {
        let toml = r#"
            [[layers]]
            id = "ttl_clamp"
            ordinal = 10

            [layers.activate]
            name = "ttl_activate"
            program = "iptables"
            args = ["-t", "mangle", "-A", "POSTROUTING", "-o", "{iface}"]

            [layers.deactivate]
            name = "ttl_deactivate"
            program = "iptables"
            args = ["-t", "mangle", "-D", "POSTROUTING", "-o", "{iface}"]

            [layers.verify]
            name = "ttl_verify"
            program = "iptables"
            args = ["-t", "mangle", "-C", "POSTROUTING", "-o", "{iface}"]
        "#;
        let catalog = LayerCatalog::from_toml(toml).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.layers()[0].activate.timeout_ms, 10_000);
    }

    #[test]
    fn test_signature_matching() {
        let sig = Signature {
            operation: Some("ttl_activate".to_string()),
            stderr_contains: Some("permission denied".to_string()),
            ..Default::default()
        };
        let raw = RawFailure {
            operation: "ttl_activate".to_string(),
            exit_code: Some(4),
            stderr: "iptables: Permission denied (you must be root)".to_string(),
            timed_out: false,
        };
        assert!(sig.matches(&raw));

        let other = RawFailure {
            operation: "dns_activate".to_string(),
            ..raw.clone()
        };
        assert!(!sig.matches(&other));
    }

    #[test]
    fn test_empty_signature_matches_nothing() {
        let sig = Signature::default();
        let raw = RawFailure::signal("anything", "whatever");
        assert!(!sig.matches(&raw));
    }

    #[test]
    fn test_error_catalog_first_match_wins() {
        let catalog = ErrorCatalog::new(vec![
            CatalogEntry {
                code: "specific".to_string(),
                category: ErrorCategory::System,
                message: "specific".to_string(),
                matches: vec![Signature {
                    operation: Some("op".to_string()),
                    exit_code: Some(4),
                    ..Default::default()
                }],
                auto_fix: None,
                recheck: None,
                manual_steps: vec![],
            },
            CatalogEntry {
                code: "broad".to_string(),
                category: ErrorCategory::System,
                message: "broad".to_string(),
                matches: vec![Signature {
                    operation: Some("op".to_string()),
                    ..Default::default()
                }],
                auto_fix: None,
                recheck: None,
                manual_steps: vec![],
            },
        ]);

        let raw = RawFailure {
            operation: "op".to_string(),
            exit_code: Some(4),
            stderr: String::new(),
            timed_out: false,
        };
        assert_eq!(catalog.lookup(&raw).unwrap().code, "specific");

        let raw = RawFailure {
            exit_code: Some(1),
            ..raw
        };
        assert_eq!(catalog.lookup(&raw).unwrap().code, "broad");
    }
}
