//! Error taxonomy shared by the probes and the connection lifecycle.
//!
//! | Variant            | Surfaced as              | Retry            |
//! |--------------------|--------------------------|------------------|
//! | `Unsupported`      | standing warning         | never            |
//! | `UserCancelled`    | one-off message          | user decides     |
//! | `TransportFailure` | one-off message          | manual           |
//! | `InvalidState`     | returned to the caller   | fix the caller   |
//! | `UnknownBackend`   | returned to the caller   | fix the caller   |
//!
//! Probe-level failures use the separate [`ProbeError`] type because they are
//! expected, recur every poll interval, and are swallowed into "no backends"
//! rather than propagated.

use thiserror::Error;

use crate::domain::lifecycle::ConnectionState;

/// Errors reported by device-facing operations (`connect`, `disconnect`,
/// `request_new`, manual selection).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The host lacks a required transport capability.
    #[error("{capability} is not supported on this host")]
    Unsupported { capability: &'static str },

    /// An interactive authorization prompt was dismissed.
    #[error("authorization was cancelled by the user")]
    UserCancelled,

    /// Handshake or authorization was rejected, or the link failed while connecting.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The operation is forbidden in the current lifecycle state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// A manual pick named a backend that is not in the current snapshot.
    #[error("no backend with id {0:?} is currently available")]
    UnknownBackend(String),
}

impl DeviceError {
    /// `true` for failures that will not go away by retrying.
    ///
    /// Persistent failures are shown as a standing, dismissable warning
    /// instead of a one-off error.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Errors raised while enumerating a transport.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The platform enumeration API reported an error.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// The probe is not available on this host.
    #[error("{0} probing is not supported on this host")]
    Unsupported(&'static str),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
