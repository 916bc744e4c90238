//! Bypass layer state

use crate::catalog::LayerSpec;

/// Lifecycle state of one bypass layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStatus {
    /// Not applied to the network
    Inactive,
    /// Applied and believed to be in place
    Active,
    /// The last activate/deactivate on this layer did not succeed
    Failed,
}

/// One bypass layer bound to a concrete interface
#[derive(Debug, Clone)]
pub struct BypassLayer {
    spec: LayerSpec,
    status: LayerStatus,
}

impl BypassLayer {
    /// Wrap a bound spec in its initial (inactive) state
    pub fn new(spec: LayerSpec) -> Self {
        Self {
            spec,
            status: LayerStatus::Inactive,
        }
    }

    /// Layer id
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Activation ordinal
    pub fn ordinal(&self) -> u16 {
        self.spec.ordinal
    }

    /// Current status
    pub fn status(&self) -> LayerStatus {
        self.status
    }

    /// The bound operations
    pub fn spec(&self) -> &LayerSpec {
        &self.spec
    }

    pub(crate) fn set_status(&mut self, status: LayerStatus) {
        self.status = status;
    }
}
