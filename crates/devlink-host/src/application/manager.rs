//! DeviceManager: the coordinator between discovery, selection and lifecycle.
//!
//! # Responsibilities (for beginners)
//!
//! ```text
//!  USB probe ──UsbListed──┐
//!                         ├──► registry ──► reconcile ──► selection
//!  net probe ──NetworkListed┘        │
//!                                    └──► controller.retain()  (orphan an in-flight attempt)
//!
//!  connect() ──► selection ──► controller.begin_connect() ──► finish_connect()
//! ```
//!
//! All registry mutations and selection changes go through one mutex, so a
//! probe report and a user action can never interleave halfway.  Lock order
//! is always *manager, then controller*; the controller never calls back into
//! the manager.
//!
//! Everything the UI needs is published through `tokio::sync::watch`
//! channels, so readers never take the mutex.
//!
//! # Warnings
//!
//! A host without USB support gets a standing [`Warning::UsbUnsupported`].
//! It stays until the user dismisses it, and once dismissed it is not raised
//! again for the lifetime of the manager.

use std::collections::BTreeSet;
use std::sync::Arc;

use devlink_core::{
    reconcile, Backend, BackendKind, BackendRegistry, ConnectionState, DeviceError,
    RegistrySnapshot,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use super::discovery::ProbeEvent;
use super::lifecycle::{ConnectedDevice, LifecycleController, LifecycleEvent};
use crate::infrastructure::usb::{self, UsbHost};

/// A standing condition shown to the user until dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    /// This host cannot access USB devices; only network backends will appear.
    UsbUnsupported,
}

impl Warning {
    /// Text shown to the user.
    pub fn message(self) -> &'static str {
        match self {
            Self::UsbUnsupported => {
                "USB device access is not supported on this host; only network devices can be used"
            }
        }
    }
}

struct ManagerState {
    registry: BackendRegistry,
    selection: Option<Backend>,
    dismissed: BTreeSet<Warning>,
}

/// Coordinates the registry, the selection and the connection lifecycle.
pub struct DeviceManager {
    state: Mutex<ManagerState>,
    controller: Arc<LifecycleController>,
    usb: Arc<dyn UsbHost>,
    snapshot_tx: watch::Sender<RegistrySnapshot>,
    selection_tx: watch::Sender<Option<Backend>>,
    warnings_tx: watch::Sender<Vec<Warning>>,
}

impl DeviceManager {
    /// Creates a manager with an empty registry and no selection.
    ///
    /// Raises [`Warning::UsbUnsupported`] right away when `usb` lacks support.
    pub fn new(controller: Arc<LifecycleController>, usb: Arc<dyn UsbHost>) -> Arc<Self> {
        let warnings = if usb.is_supported() {
            Vec::new()
        } else {
            warn!("{}", Warning::UsbUnsupported.message());
            vec![Warning::UsbUnsupported]
        };
        let (snapshot_tx, _) = watch::channel(RegistrySnapshot::default());
        let (selection_tx, _) = watch::channel(None);
        let (warnings_tx, _) = watch::channel(warnings);
        Arc::new(Self {
            state: Mutex::new(ManagerState {
                registry: BackendRegistry::new(),
                selection: None,
                dismissed: BTreeSet::new(),
            }),
            controller,
            usb,
            snapshot_tx,
            selection_tx,
            warnings_tx,
        })
    }

    // ── Readers ───────────────────────────────────────────────────────────────

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn usb_host(&self) -> Arc<dyn UsbHost> {
        Arc::clone(&self.usb)
    }

    /// The latest registry snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<RegistrySnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The current selection.
    pub fn selection(&self) -> Option<Backend> {
        self.selection_tx.borrow().clone()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<Option<Backend>> {
        self.selection_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.controller.subscribe_state()
    }

    /// The published session, if any.
    pub fn current_device(&self) -> Option<ConnectedDevice> {
        self.controller.current_device()
    }

    pub fn subscribe_device(&self) -> watch::Receiver<Option<ConnectedDevice>> {
        self.controller.subscribe_device()
    }

    /// Lifecycle events, including the "device disconnected" notice.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.controller.subscribe_events()
    }

    /// Standing warnings not yet dismissed.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings_tx.borrow().clone()
    }

    pub fn subscribe_warnings(&self) -> watch::Receiver<Vec<Warning>> {
        self.warnings_tx.subscribe()
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Applies one probe report.
    pub async fn handle_probe_event(&self, event: ProbeEvent) {
        let mut state = self.state.lock().await;
        match event {
            ProbeEvent::UsbListed {
                backends,
                select_hint,
            } => {
                debug!("USB probe reported {} backend(s)", backends.len());
                if let Some(snapshot) = state.registry.replace_usb(backends) {
                    self.apply_snapshot(&mut state, snapshot).await;
                }
                if let Some(hint) = select_hint {
                    let hinted = state
                        .registry
                        .snapshot()
                        .find_endpoint(BackendKind::Usb, &hint)
                        .cloned();
                    match hinted {
                        Some(backend) => self.set_selection(&mut state, Some(backend)),
                        None => debug!("selection hint {hint:?} is not in the registry"),
                    }
                }
            }
            ProbeEvent::NetworkListed(backends) => {
                if self.controller.state().is_busy() {
                    debug!("network report discarded: lifecycle is {}", self.controller.state());
                    return;
                }
                if let Some(snapshot) = state.registry.replace_network(backends) {
                    self.apply_snapshot(&mut state, snapshot).await;
                }
            }
        }
    }

    async fn apply_snapshot(&self, state: &mut ManagerState, snapshot: RegistrySnapshot) {
        info!(
            "registry changed: [{}]",
            snapshot
                .iter()
                .map(Backend::label)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let next = reconcile(state.selection.as_ref(), &snapshot);
        self.controller.retain(&snapshot).await;
        self.snapshot_tx.send_replace(snapshot);
        self.set_selection(state, next);
    }

    fn set_selection(&self, state: &mut ManagerState, next: Option<Backend>) {
        if state.selection != next {
            match &next {
                Some(backend) => info!("selected {}", backend.label()),
                None => info!("selection cleared"),
            }
        }
        state.selection = next.clone();
        self.selection_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ── User actions ──────────────────────────────────────────────────────────

    /// Manual pick.  Bypasses reconciliation until the next registry change.
    ///
    /// Fails with `UnknownBackend` if `id` is not in the current snapshot.
    pub async fn select(&self, id: &str) -> Result<Backend, DeviceError> {
        let mut state = self.state.lock().await;
        let backend = state
            .registry
            .snapshot()
            .find(id)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownBackend(id.to_string()))?;
        self.set_selection(&mut state, Some(backend.clone()));
        Ok(backend)
    }

    /// Runs the USB authorization prompt, then refreshes the USB report and
    /// selects the newly authorized device.
    ///
    /// The prompt runs without holding the manager lock.
    pub async fn request_new_usb(&self) -> Result<Backend, DeviceError> {
        let backend = match usb::request_new_backend(Arc::clone(&self.usb)).await {
            Ok(backend) => backend,
            Err(e) => {
                // Only a missing USB stack earns the standing warning; a prompt
                // that cannot be shown here is reported to the caller alone.
                if matches!(e, DeviceError::Unsupported { capability } if capability == usb::USB_CAPABILITY)
                {
                    self.raise_warning(Warning::UsbUnsupported).await;
                }
                return Err(e);
            }
        };
        let backends = usb::list_backends(Arc::clone(&self.usb)).await;
        self.handle_probe_event(ProbeEvent::UsbListed {
            backends,
            select_hint: Some(backend.id.clone()),
        })
        .await;
        Ok(backend)
    }

    /// Connects to the selected backend.
    ///
    /// Fails with `InvalidState` when nothing is selected or the controller is
    /// not `Idle`.  The handshake itself runs on its own task, so dropping the
    /// returned future does not strand the controller in `Connecting`.
    pub async fn connect(&self) -> Result<ConnectedDevice, DeviceError> {
        let attempt = {
            let state = self.state.lock().await;
            let Some(backend) = state.selection.clone() else {
                return Err(DeviceError::InvalidState {
                    operation: "connect without a selected backend",
                    state: self.controller.state(),
                });
            };
            self.controller.begin_connect(backend).await?
        };

        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move { controller.finish_connect(attempt).await })
            .await
            .map_err(|e| DeviceError::TransportFailure(format!("connect task failed: {e}")))?
    }

    /// Releases the connected session.  A no-op when `Idle`.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        self.controller.disconnect().await
    }

    /// Adds `warning` unless it is already shown or was dismissed.
    pub async fn raise_warning(&self, warning: Warning) {
        let state = self.state.lock().await;
        if state.dismissed.contains(&warning) {
            return;
        }
        self.warnings_tx.send_if_modified(|warnings| {
            if warnings.contains(&warning) {
                false
            } else {
                warn!("{}", warning.message());
                warnings.push(warning);
                true
            }
        });
    }

    /// Removes `warning`; it will not be raised again.
    pub async fn dismiss_warning(&self, warning: Warning) {
        let mut state = self.state.lock().await;
        state.dismissed.insert(warning);
        self.warnings_tx.send_if_modified(|warnings| {
            let before = warnings.len();
            warnings.retain(|w| *w != warning);
            warnings.len() != before
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
