//! # TetherVeil Core
//!
//! Platform-independent connection orchestration for tethered links.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Connection state machine** - single-owner lifecycle control
//! - **Bypass layer pipeline** - ordered activation with all-or-nothing
//!   semantics and best-effort teardown
//! - **Health monitoring** - debounced link quality and layer integrity
//! - **Error classification and recovery** - catalog-driven auto-fixes with
//!   mandatory re-verification
//!
//! Everything privileged happens through the [`ops::OperationRunner`] seam;
//! the concrete commands live in the platform crate and in catalogs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tveil_core::{Config, ConnectionManager};
//! use tveil_core::machine::{Components, NullSink};
//!
//! # fn components() -> Components { unimplemented!() }
//! let config = Config::default();
//! let handle = ConnectionManager::spawn(config, components(), Arc::new(NullSink))?;
//! handle.connect();
//! # Ok::<(), tveil_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod machine;
pub mod ops;
pub mod pipeline;
pub mod proxy;
pub mod recovery;
pub mod resolver;

// Re-exports for convenience
pub use config::{Config, Profile};
pub use error::{Error, ErrorCategory, Result};
pub use machine::{ConnectionHandle, ConnectionManager, ConnectionState};
pub use pipeline::BypassPipeline;
pub use recovery::{ErrorRecord, RecoveryAttempt, RecoveryOutcome};
pub use resolver::{InterfaceInfo, InterfaceKind};
