//! TetherVeil platform layer
//!
//! Supplies the concrete Linux pieces the core treats as opaque: a process
//! runner for privileged commands, the builtin bypass layer and error
//! catalogs, interface discovery operations, the ping-based link probe and
//! environment preflight checks.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod catalog;
mod preflight;
mod probe;
mod process;

pub use catalog::{default_discovery_catalog, default_error_catalog, default_layer_catalog};
pub use preflight::{has_blocking_failure, run_preflight, PreflightCheck};
pub use probe::PingProbe;
pub use process::ShellRunner;

use std::sync::Arc;
use std::time::Duration;
use tveil_core::catalog::{ErrorCatalog, LayerCatalog};
use tveil_core::config::Config;
use tveil_core::error::Result;
use tveil_core::machine::Components;
use tveil_core::proxy::HttpProxyProbe;

/// Wire up the default Linux component stack for the given configuration.
///
/// Honors `layers.catalog` and `recovery.catalog` as TOML overrides for the
/// builtin layer and error catalogs.
pub fn default_components(config: &Config) -> Result<Components> {
    let runner = Arc::new(ShellRunner::new());

    let layers = match &config.layers.catalog {
        Some(path) => LayerCatalog::load(path)?,
        None => default_layer_catalog(),
    };
    let errors = match &config.recovery.catalog {
        Some(path) => ErrorCatalog::load(path)?,
        None => default_error_catalog(),
    };

    Ok(Components {
        runner: runner.clone(),
        discovery: default_discovery_catalog(),
        layers,
        errors,
        proxy: Box::new(HttpProxyProbe::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
        )),
        link: Arc::new(PingProbe::new(runner)),
    })
}
