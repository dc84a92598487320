//! Session and connector abstractions.
//!
//! The device protocol (handshake, authentication, channel multiplexing, file
//! transfer, process execution) is not implemented here.  The host consumes it
//! through two traits:
//!
//! - [`Connector`] turns a selected [`Backend`] into a live [`Session`] using
//!   the process-wide [`CredentialStore`].
//! - [`Session`] is the live connection: descriptive fields, a one-shot
//!   link-lost notification, and the file/process sub-API that collaborators
//!   layered on top of a session use.
//!
//! # Testability
//!
//! [`mock::MockConnector`] and [`mock::MockSession`] let unit and integration
//! tests drive every lifecycle transition without a real device.

use std::sync::Arc;

use async_trait::async_trait;
use devlink_core::{Backend, DeviceError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::application::credentials::CredentialStore;

pub mod mock;

/// Errors raised by operations on an established session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session has already been closed or its link is gone.
    #[error("session is closed")]
    Closed,
    /// The remote side reported a failure.
    #[error("remote error: {0}")]
    Remote(String),
    /// Local I/O on the transport failed.
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Descriptive fields of a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub protocol_version: u32,
    pub model: Option<String>,
    pub device: Option<String>,
}

impl SessionInfo {
    /// Protocol version as 8 zero-padded hex digits, the way device tools print it.
    pub fn protocol_version_hex(&self) -> String {
        format!("{:08x}", self.protocol_version)
    }
}

/// Sending side of a session's link-lost notification.
///
/// Held by the session implementation.  [`LinkLostTrigger::fire`] only has an
/// effect the first time it is called.
#[derive(Debug)]
pub struct LinkLostTrigger {
    tx: watch::Sender<bool>,
}

impl LinkLostTrigger {
    /// Creates a trigger that has not fired yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fires the notification.  Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|lost| {
            if *lost {
                false
            } else {
                *lost = true;
                true
            }
        })
    }

    /// Returns `true` once the notification has fired.
    pub fn has_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Creates a receiver for this notification.
    pub fn signal(&self) -> LinkLostSignal {
        LinkLostSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for LinkLostTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a session's link-lost notification.
#[derive(Debug, Clone)]
pub struct LinkLostSignal {
    rx: watch::Receiver<bool>,
}

impl LinkLostSignal {
    /// Resolves once the link is lost.
    ///
    /// A trigger dropped without firing counts as a lost link: the session
    /// implementation is gone.
    pub async fn fired(mut self) {
        let _ = self.rx.wait_for(|lost| *lost).await;
    }
}

/// A process started with [`Session::remote_spawn`].
///
/// Output arrives as raw byte chunks.  Both channels close when the remote
/// process exits.
#[derive(Debug)]
pub struct RemoteProcess {
    pub stdout: mpsc::Receiver<Vec<u8>>,
    pub stderr: mpsc::Receiver<Vec<u8>>,
}

/// Scoped file-transfer channel.  Must be released with [`FileChannel::dispose`].
#[async_trait]
pub trait FileChannel: Send {
    /// Writes `contents` to `path` on the device with unix permission `mode`.
    async fn write(&mut self, path: &str, contents: &[u8], mode: u32) -> Result<(), SessionError>;

    /// Releases the channel.
    async fn dispose(self: Box<Self>) -> Result<(), SessionError>;
}

/// A live, authenticated connection to exactly one backend.
#[async_trait]
pub trait Session: Send + Sync {
    fn protocol_version(&self) -> u32;

    fn model(&self) -> Option<String>;

    fn device(&self) -> Option<String>;

    /// One-shot notification fired when the link is lost for reasons outside
    /// the host's control.
    fn link_lost(&self) -> LinkLostSignal;

    /// Runs `command` with `args` and returns its standard output.
    async fn remote_exec(&self, command: &str, args: &[&str]) -> Result<String, SessionError>;

    /// Starts `command` and streams its output.
    async fn remote_spawn(&self, command: &str) -> Result<RemoteProcess, SessionError>;

    /// Opens a file-transfer channel.
    async fn file_channel(&self) -> Result<Box<dyn FileChannel>, SessionError>;

    /// Releases every resource held by the session.
    async fn close(&self) -> Result<(), SessionError>;

    /// Descriptive fields bundled together.
    fn info(&self) -> SessionInfo {
        SessionInfo {
            protocol_version: self.protocol_version(),
            model: self.model(),
            device: self.device(),
        }
    }
}

/// Turns a backend into a session.
///
/// Implementations must release any partially constructed resources before
/// returning an error.  Failures are mapped onto the [`DeviceError`] taxonomy:
/// a dismissed on-device authorization prompt is `UserCancelled`, everything
/// else on the wire is `TransportFailure`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        backend: &Backend,
        credentials: &CredentialStore,
    ) -> Result<Arc<dyn Session>, DeviceError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_protocol_version_hex_is_zero_padded() {
        let info = SessionInfo {
            protocol_version: 0x0100_0001,
            model: None,
            device: None,
        };
        assert_eq!(info.protocol_version_hex(), "01000001");
    }

    #[test]
    fn test_trigger_fires_only_once() {
        // Arrange
        let trigger = LinkLostTrigger::new();

        // Act
        let first = trigger.fire();
        let second = trigger.fire();

        // Assert
        assert!(first);
        assert!(!second, "a second fire must be a no-op");
        assert!(trigger.has_fired());
    }

    #[tokio::test]
    async fn test_signal_resolves_after_fire() {
        let trigger = LinkLostTrigger::new();
        let signal = trigger.signal();

        trigger.fire();

        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .expect("signal must resolve once fired");
    }

    #[tokio::test]
    async fn test_signal_created_after_fire_resolves_immediately() {
        let trigger = LinkLostTrigger::new();
        trigger.fire();

        let signal = trigger.signal();

        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .expect("late subscriber still observes the lost link");
    }

    #[tokio::test]
    async fn test_signal_resolves_when_trigger_dropped() {
        let trigger = LinkLostTrigger::new();
        let signal = trigger.signal();

        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .expect("dropped trigger counts as lost link");
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_pending_while_link_alive() {
        let trigger = LinkLostTrigger::new();
        let signal = trigger.signal();

        let result = tokio::time::timeout(Duration::from_secs(5), signal.fired()).await;

        assert!(result.is_err(), "signal must stay pending until fired");
        drop(trigger);
    }
}
