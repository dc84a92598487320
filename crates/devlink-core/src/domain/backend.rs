//! The [`Backend`] value type.
//!
//! A backend is one connectable endpoint that a probe currently reports.  It
//! carries no liveness flag: a backend is "alive" exactly as long as it is a
//! member of the latest registry snapshot.  When the endpoint goes away the
//! backend is removed from the next snapshot, never edited in place.
//!
//! # Identity
//!
//! `id` is the only identity that matters.  Two `Backend` values with the same
//! `id` and `kind` describe the same endpoint even when their `display_name`
//! differs or when they were produced by different probe rounds.  Always
//! compare backends with [`Backend::same_endpoint`] or by `id`, never by the
//! address of a particular value.

use serde::{Deserialize, Serialize};

/// Transport kind of a backend.
///
/// The kind decides which probe owns the backend and how the connector
/// reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// A directly attached USB-class device, identified by its serial number.
    Usb,
    /// A network endpoint, identified by its URL.
    Network,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usb => f.write_str("usb"),
            Self::Network => f.write_str("network"),
        }
    }
}

/// A discovered, connectable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    /// Stable identity, unique within `kind`.
    pub id: String,
    /// Optional human label (USB product string, endpoint description).
    pub display_name: Option<String>,
    /// Which transport this backend belongs to.
    pub kind: BackendKind,
}

impl Backend {
    /// Creates a USB backend from a device serial number.
    pub fn usb(serial: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: serial.into(),
            display_name,
            kind: BackendKind::Usb,
        }
    }

    /// Creates a network backend for `endpoint` (a `ws://` URL).
    pub fn network(endpoint: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: endpoint.into(),
            display_name,
            kind: BackendKind::Network,
        }
    }

    /// Returns `true` when `other` denotes the same endpoint.
    pub fn same_endpoint(&self, other: &Backend) -> bool {
        self.kind == other.kind && self.id == other.id
    }

    /// Label shown in pickers: `"<id> (<display_name>)"`, or just the id.
    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => format!("{} ({name})", self.id),
            _ => self.id.clone(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
