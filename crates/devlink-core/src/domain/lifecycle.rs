//! Connection lifecycle states.
//!
//! ```text
//! Idle  ──connect()──►  Connecting  ──ok──►  Connected
//!  ▲                        │                    │
//!  └────────── err ─────────┘                    │
//!  └──────── disconnect() / link lost ───────────┘
//! ```
//!
//! `Connecting` is always transient: every attempt resolves to `Connected` or
//! back to `Idle` with a reported error.

use serde::{Deserialize, Serialize};

/// Current state of the single device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session, no attempt in flight.
    #[default]
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// A session is established and published.
    Connected,
}

impl ConnectionState {
    /// `true` while a session exists or an attempt is in flight.
    ///
    /// The network probe stays silent whenever this returns `true`.
    pub fn is_busy(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_only_idle_is_not_busy() {
        assert!(!ConnectionState::Idle.is_busy());
        assert!(ConnectionState::Connecting.is_busy());
        assert!(ConnectionState::Connected.is_busy());
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
