//! LifecycleController: the single-connection state machine.
//!
//! # States (for beginners)
//!
//! ```text
//!            begin_connect()            finish_connect() ok
//!   Idle ─────────────────────► Connecting ─────────────────► Connected
//!    ▲                              │                            │
//!    │       connector error        │                            │
//!    ├──────────────────────────────┘                            │
//!    │       backend vanished mid-attempt (session closed)       │
//!    │                                                           │
//!    └──────────── disconnect() / link lost ─────────────────────┘
//! ```
//!
//! Every transition happens while holding the controller's mutex, so two
//! callers can never both see `Idle` and both start an attempt.  The slow part
//! of a connect (the connector handshake, which may wait on an on-device
//! authorization prompt) runs *outside* the mutex; the state is `Connecting`
//! for the whole duration and every other `connect()` is rejected with
//! `InvalidState`.
//!
//! # Published values
//!
//! - a `watch` of [`ConnectionState`], read by the network probe loop;
//! - a `watch` of `Option<ConnectedDevice>`, the published session or its absence;
//! - a `broadcast` of [`LifecycleEvent`]s for logs and UI notices.
//!
//! # Two-phase connect
//!
//! [`LifecycleController::begin_connect`] moves `Idle → Connecting` and hands
//! back a [`ConnectAttempt`] token.  [`LifecycleController::finish_connect`]
//! runs the connector and resolves the attempt.  The device manager calls
//! `begin_connect` under its own lock, right after reading the selection, so a
//! registry change cannot slip in between.  If the backend leaves the registry
//! while the attempt is in flight the manager calls
//! [`LifecycleController::retain`], the attempt is flagged, and when it
//! completes its session is closed instead of published.

use std::sync::{Arc, Weak};

use devlink_core::{Backend, ConnectionState, DeviceError, RegistrySnapshot};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::credentials::CredentialStore;
use super::link_watch::LinkWatch;
use super::session::{Connector, Session};

/// Capacity of the lifecycle event broadcast.  Slow subscribers lag and skip.
const EVENT_CAPACITY: usize = 64;

/// The published session together with the backend it is bound to.
#[derive(Clone)]
pub struct ConnectedDevice {
    pub backend: Backend,
    pub session: Arc<dyn Session>,
}

impl std::fmt::Debug for ConnectedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedDevice")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// Lifecycle events, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A session was established and published.
    Connected { backend: Backend },
    /// A connect attempt failed; the controller is back to `Idle`.
    ConnectFailed { backend: Backend, error: DeviceError },
    /// `disconnect()` released the session.
    Disconnected { backend: Backend },
    /// The session's link was lost and the session was torn down.
    DeviceDisconnected { backend: Backend },
}

/// Token for an attempt started with [`LifecycleController::begin_connect`].
#[derive(Debug)]
#[must_use = "an attempt stays Connecting until finish_connect is called"]
pub struct ConnectAttempt {
    id: Uuid,
    backend: Backend,
}

impl ConnectAttempt {
    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}

enum Lifecycle {
    Idle,
    Connecting {
        attempt: Uuid,
        backend: Backend,
        orphaned: bool,
    },
    Connected {
        device: ConnectedDevice,
        generation: Uuid,
        link_watch: LinkWatch,
    },
}

impl Lifecycle {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Connected { .. } => ConnectionState::Connected,
        }
    }
}

/// Owns the single device connection.
pub struct LifecycleController {
    connector: Arc<dyn Connector>,
    credentials: Arc<CredentialStore>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<ConnectionState>,
    device_tx: watch::Sender<Option<ConnectedDevice>>,
    events_tx: broadcast::Sender<LifecycleEvent>,
    this: Weak<LifecycleController>,
}

impl LifecycleController {
    /// Creates a controller in `Idle`.
    ///
    /// `credentials` is presented on every attempt; the binary passes
    /// [`CredentialStore::process_wide`], tests pass a fresh store.
    pub fn new(connector: Arc<dyn Connector>, credentials: Arc<CredentialStore>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (device_tx, _) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|this| Self {
            connector,
            credentials,
            lifecycle: Mutex::new(Lifecycle::Idle),
            state_tx,
            device_tx,
            events_tx,
            this: this.clone(),
        })
    }

    /// Current lifecycle state.  Does not wait on the mutex.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The published session, if any.
    pub fn current_device(&self) -> Option<ConnectedDevice> {
        self.device_tx.borrow().clone()
    }

    pub fn subscribe_device(&self) -> watch::Receiver<Option<ConnectedDevice>> {
        self.device_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    /// Connects to `backend` in one call.
    pub async fn connect(&self, backend: Backend) -> Result<ConnectedDevice, DeviceError> {
        let attempt = self.begin_connect(backend).await?;
        self.finish_connect(attempt).await
    }

    /// Moves `Idle → Connecting`.
    ///
    /// Fails with `InvalidState` (and changes nothing) unless the controller
    /// is `Idle`.
    pub async fn begin_connect(&self, backend: Backend) -> Result<ConnectAttempt, DeviceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(DeviceError::InvalidState {
                operation: "connect",
                state: lifecycle.state(),
            });
        }
        let id = Uuid::new_v4();
        info!(backend = %backend.label(), attempt = %id, "connecting");
        *lifecycle = Lifecycle::Connecting {
            attempt: id,
            backend: backend.clone(),
            orphaned: false,
        };
        self.publish_state(&lifecycle);
        Ok(ConnectAttempt { id, backend })
    }

    /// Runs the connector for `attempt` and resolves it.
    ///
    /// On success the session is published and a [`LinkWatch`] is installed.
    /// On failure the controller returns to `Idle` and the error is returned
    /// unchanged.  If the backend left the registry while the attempt was in
    /// flight the new session is closed and `TransportFailure` is returned.
    pub async fn finish_connect(
        &self,
        attempt: ConnectAttempt,
    ) -> Result<ConnectedDevice, DeviceError> {
        let outcome = self
            .connector
            .connect(&attempt.backend, &self.credentials)
            .await;

        let mut lifecycle = self.lifecycle.lock().await;
        let orphaned = match &*lifecycle {
            Lifecycle::Connecting {
                attempt: current,
                orphaned,
                ..
            } if *current == attempt.id => *orphaned,
            other => {
                // The attempt was resolved elsewhere; nothing to publish.
                let state = other.state();
                drop(lifecycle);
                if let Ok(session) = outcome {
                    let _ = session.close().await;
                }
                return Err(DeviceError::InvalidState {
                    operation: "finish connect",
                    state,
                });
            }
        };

        let session = match outcome {
            Ok(session) if !orphaned => session,
            Ok(session) => {
                *lifecycle = Lifecycle::Idle;
                self.publish_state(&lifecycle);
                drop(lifecycle);
                warn!(backend = %attempt.backend.label(), "backend disappeared while connecting; closing new session");
                if let Err(e) = session.close().await {
                    debug!("closing orphaned session failed: {e}");
                }
                let error = DeviceError::TransportFailure(format!(
                    "{} disappeared while connecting",
                    attempt.backend.label()
                ));
                self.emit(LifecycleEvent::ConnectFailed {
                    backend: attempt.backend,
                    error: error.clone(),
                });
                return Err(error);
            }
            Err(error) => {
                *lifecycle = Lifecycle::Idle;
                self.publish_state(&lifecycle);
                drop(lifecycle);
                warn!(backend = %attempt.backend.label(), "connect failed: {error}");
                self.emit(LifecycleEvent::ConnectFailed {
                    backend: attempt.backend,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        let generation = Uuid::new_v4();
        let this = self.this.clone();
        let link_watch = LinkWatch::spawn(session.link_lost(), generation, move |generation| async move {
            if let Some(controller) = this.upgrade() {
                controller.handle_link_lost(generation).await;
            }
        });
        let device = ConnectedDevice {
            backend: attempt.backend,
            session,
        };
        *lifecycle = Lifecycle::Connected {
            device: device.clone(),
            generation,
            link_watch,
        };
        self.publish_state(&lifecycle);
        self.device_tx.send_replace(Some(device.clone()));
        drop(lifecycle);

        info!(backend = %device.backend.label(), %generation, "connected");
        self.emit(LifecycleEvent::Connected {
            backend: device.backend.clone(),
        });
        Ok(device)
    }

    /// Releases the session and returns to `Idle`.
    ///
    /// `Idle` is a no-op.  `Connecting` is rejected with `InvalidState`.  A
    /// failing session close still leaves the controller `Idle`; the close
    /// error is returned as `TransportFailure`.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Idle => return Ok(()),
            Lifecycle::Connecting { .. } => {
                return Err(DeviceError::InvalidState {
                    operation: "disconnect",
                    state: ConnectionState::Connecting,
                })
            }
            Lifecycle::Connected { .. } => {}
        }
        let Lifecycle::Connected {
            device, link_watch, ..
        } = std::mem::replace(&mut *lifecycle, Lifecycle::Idle)
        else {
            return Ok(());
        };
        drop(link_watch);
        self.publish_state(&lifecycle);
        self.device_tx.send_replace(None);

        info!(backend = %device.backend.label(), "disconnecting");
        let closed = device.session.close().await;
        drop(lifecycle);

        self.emit(LifecycleEvent::Disconnected {
            backend: device.backend,
        });
        closed.map_err(|e| DeviceError::TransportFailure(format!("session close failed: {e}")))
    }

    /// Flags an in-flight attempt whose backend is no longer in `snapshot`.
    ///
    /// A connected session is never torn down here; its own link-lost signal
    /// does that.
    pub async fn retain(&self, snapshot: &RegistrySnapshot) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Connecting {
            backend, orphaned, ..
        } = &mut *lifecycle
        {
            if !*orphaned && !snapshot.contains_endpoint(backend) {
                info!(backend = %backend.label(), "backend left the registry during connect");
                *orphaned = true;
            }
        }
    }

    /// Forced teardown, run by the link watch of `generation`.
    ///
    /// Ignored unless the controller is still in that same connected interval.
    pub async fn handle_link_lost(&self, generation: Uuid) {
        let mut lifecycle = self.lifecycle.lock().await;
        let current = matches!(
            &*lifecycle,
            Lifecycle::Connected { generation: g, .. } if *g == generation
        );
        if !current {
            debug!(%generation, "stale link-lost signal ignored");
            return;
        }
        let Lifecycle::Connected {
            device, link_watch, ..
        } = std::mem::replace(&mut *lifecycle, Lifecycle::Idle)
        else {
            return;
        };
        // This runs on the watch's own task.
        link_watch.detach();
        self.publish_state(&lifecycle);
        self.device_tx.send_replace(None);
        drop(lifecycle);

        warn!(backend = %device.backend.label(), "device disconnected: link lost");
        if let Err(e) = device.session.close().await {
            debug!("closing lost session failed: {e}");
        }
        self.emit(LifecycleEvent::DeviceDisconnected {
            backend: device.backend,
        });
    }

    fn publish_state(&self, lifecycle: &Lifecycle) {
        let state = lifecycle.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("lifecycle {} -> {}", current, state);
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
