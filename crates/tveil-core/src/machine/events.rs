//! Observable state and notifications
//!
//! The state machine is the sole writer of [`ConnectionState`]; everything
//! else observes it through [`Notification`]s delivered to an [`EventSink`]
//! or through snapshot reads on the handle.

use crate::health::HealthSample;
use crate::recovery::RecoveryAttempt;
use crate::resolver::InterfaceInfo;
use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial and final rest state
    Disconnected,
    /// Discovery, validation and layer activation in progress
    Connecting,
    /// Fully bypassed and monitored
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// A failure was classified and is being decided on
    Error,
    /// An automated fix is being applied and re-verified
    ErrorRecovery,
}

impl ConnectionState {
    /// Whether the machine is mid-transition and rejects new requests
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Disconnecting | Self::ErrorRecovery
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
            Self::ErrorRecovery => "error-recovery",
        };
        f.write_str(s)
    }
}

/// Immediate answer to a connect/disconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request was queued and will be processed in order
    Accepted,
    /// The machine is mid-transition; the request was rejected, not queued
    Busy(ConnectionState),
    /// The machine is already in (or already heading to) the requested state
    Ignored,
}

/// Events emitted by the state machine for external observers
#[derive(Debug, Clone)]
pub enum Notification {
    /// The connection state changed
    StateChanged {
        /// Previous state
        old: ConnectionState,
        /// New state
        new: ConnectionState,
    },
    /// A tethering interface was discovered for this attempt
    InterfaceResolved(InterfaceInfo),
    /// The health monitor declared the connection degraded
    HealthDegraded(HealthSample),
    /// The recovery engine ran (or escalated) a remediation
    RecoveryAttempted(RecoveryAttempt),
}

/// Receives state-change and health notifications.
///
/// Emission happens on the owner loop, so implementations must not block
/// for long and must not call back into the connection handle.
pub trait EventSink: Send + Sync {
    /// Handle one notification
    fn emit(&self, event: &Notification);
}

/// Sink that discards everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Notification) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitional_states() {
        assert!(ConnectionState::Connecting.is_transitional());
        assert!(ConnectionState::Disconnecting.is_transitional());
        assert!(ConnectionState::ErrorRecovery.is_transitional());
        assert!(!ConnectionState::Disconnected.is_transitional());
        assert!(!ConnectionState::Connected.is_transitional());
        assert!(!ConnectionState::Error.is_transitional());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::ErrorRecovery.to_string(), "error-recovery");
    }
}
