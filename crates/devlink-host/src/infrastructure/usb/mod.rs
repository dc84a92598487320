//! USB transport probe.
//!
//! Enumerates the USB devices this host has already been authorized to use,
//! prompts the user to authorize new ones, and watches for hot-plug.
//!
//! # How the watcher works (for beginners)
//!
//! There is no portable hot-plug callback for serial-class USB devices, so the
//! watcher polls.  A dedicated thread calls [`UsbHost::list`] every poll
//! interval and compares the ids it sees with the ids it saw last time:
//!
//! ```text
//! previous = {A, B}      current = {B, C}
//!                 ──►    Detached(A), Attached(C)
//! ```
//!
//! Each difference is sent as a [`UsbEvent`] on an `mpsc` channel.  The
//! consumer does not trust the event payload for the device list; on any event
//! it calls `list()` again and replaces its whole USB report.  The id in an
//! `Attached` event is only used as a selection hint.
//!
//! The thread checks a shared `running` flag between polls and exits once it
//! is cleared, or once the receiver is dropped.
//!
//! # Testability
//!
//! [`UsbHost`] is a trait.  Unit tests use the `mockall`-generated
//! `MockUsbHost`; integration tests use [`mock::ScriptedUsbHost`].

use std::collections::BTreeSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use devlink_core::{Backend, DeviceError, ProbeError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod mock;
pub mod serial;

/// Capability name reported in `DeviceError::Unsupported`.
pub const USB_CAPABILITY: &str = "USB device access";

/// A hot-plug notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    /// An authorized device with this id appeared.
    Attached(String),
    /// The device with this id went away.
    Detached(String),
}

/// Host-side USB access.  Every method may block.
#[cfg_attr(test, mockall::automock)]
pub trait UsbHost: Send + Sync {
    /// `false` when this host cannot access USB devices at all.
    fn is_supported(&self) -> bool;

    /// Point-in-time list of authorized, currently attached devices.
    fn list(&self) -> Result<Vec<Backend>, ProbeError>;

    /// Interactive prompt that authorizes one more device.
    ///
    /// Fails with `UserCancelled` if the prompt is dismissed and `Unsupported`
    /// if the host cannot show it.
    fn request_new(&self) -> Result<Backend, DeviceError>;
}

/// Lists authorized devices without blocking the runtime.
///
/// Enumeration failures are logged and reported as an empty list.  An
/// unsupported host always reports an empty list.
pub async fn list_backends(host: Arc<dyn UsbHost>) -> Vec<Backend> {
    let result = tokio::task::spawn_blocking(move || {
        if !host.is_supported() {
            return Ok(Vec::new());
        }
        host.list()
    })
    .await;
    match result {
        Ok(Ok(backends)) => backends,
        Ok(Err(e)) => {
            warn!("USB enumeration failed: {e}");
            Vec::new()
        }
        Err(e) => {
            warn!("USB enumeration task failed: {e}");
            Vec::new()
        }
    }
}

/// Runs the authorization prompt without blocking the runtime.
pub async fn request_new_backend(host: Arc<dyn UsbHost>) -> Result<Backend, DeviceError> {
    if !host.is_supported() {
        return Err(DeviceError::Unsupported {
            capability: USB_CAPABILITY,
        });
    }
    tokio::task::spawn_blocking(move || host.request_new())
        .await
        .map_err(|e| DeviceError::TransportFailure(format!("authorization prompt failed: {e}")))?
}

/// Computes the hot-plug events between two polls.
///
/// Detachments come first, then attachments, each in id order.
pub fn diff_ids(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Vec<UsbEvent> {
    let detached = previous
        .difference(current)
        .map(|id| UsbEvent::Detached(id.clone()));
    let attached = current
        .difference(previous)
        .map(|id| UsbEvent::Attached(id.clone()));
    detached.chain(attached).collect()
}

/// Shortest poll interval the watcher accepts; shorter values are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Starts the hot-plug watcher thread.
///
/// `baseline` holds the ids the caller has already applied.  Every poll,
/// including the first, is diffed against the previous id set, so a device
/// that changed between the caller's listing and the first poll still
/// produces an event.  Returns the receiving end of the event channel.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn start_usb_watcher(
    host: Arc<dyn UsbHost>,
    baseline: BTreeSet<String>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
) -> std::io::Result<mpsc::Receiver<UsbEvent>> {
    let (tx, rx) = mpsc::channel(64);
    if poll_interval < MIN_POLL_INTERVAL {
        warn!("USB poll interval {poll_interval:?} raised to {MIN_POLL_INTERVAL:?}");
    }
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);

    std::thread::Builder::new()
        .name("devlink-usb-watch".to_string())
        .spawn(move || watch_loop(host, baseline, poll_interval, tx, running))?;

    info!("USB watcher polling every {poll_interval:?}");
    Ok(rx)
}

fn watch_loop(
    host: Arc<dyn UsbHost>,
    baseline: BTreeSet<String>,
    poll_interval: Duration,
    tx: mpsc::Sender<UsbEvent>,
    running: Arc<AtomicBool>,
) {
    let mut previous = baseline;

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(poll_interval);
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let current = poll_ids(host.as_ref());
        for event in diff_ids(&previous, &current) {
            debug!("USB hot-plug: {event:?}");
            if tx.blocking_send(event).is_err() {
                debug!("USB event receiver dropped; stopping watcher");
                return;
            }
        }
        previous = current;
    }

    debug!("USB watcher stopped");
}

fn poll_ids(host: &dyn UsbHost) -> BTreeSet<String> {
    match host.list() {
        Ok(backends) => backends.into_iter().map(|b| b.id).collect(),
        Err(e) => {
            debug!("USB poll failed: {e}");
            BTreeSet::new()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
