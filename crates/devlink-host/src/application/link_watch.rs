//! Link watch: bridges a session's "link lost" signal back into the lifecycle.
//!
//! # How it works (for beginners)
//!
//! A session can die without anyone calling `disconnect()`: the cable is
//! pulled, the device reboots, the network daemon is killed.  The session
//! implementation notices and fires its one-shot link-lost signal.
//!
//! While the controller is `Connected` it owns exactly one [`LinkWatch`].  The
//! watch is a small tokio task that waits for the signal and then runs a
//! teardown callback, which puts the controller back to `Idle`.
//!
//! ```text
//! Session ──link lost──► LinkWatch task ──on_lost(generation)──► controller
//! ```
//!
//! The watch lives inside the `Connected` state value, so there is exactly one
//! subscription per connected interval.  Leaving `Connected` by any path drops
//! the watch, and dropping it aborts the task: a stale signal from an old
//! session can never tear down a newer one.
//!
//! The one exception is the teardown callback itself.  It runs *on* the watch
//! task, so it must call [`LinkWatch::detach`] instead of dropping the watch,
//! otherwise the task would cancel itself halfway through the teardown.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::session::LinkLostSignal;

/// The single link-lost subscription of a connected interval.
#[derive(Debug)]
pub struct LinkWatch {
    generation: Uuid,
    task: Option<JoinHandle<()>>,
}

impl LinkWatch {
    /// Starts watching `signal`.
    ///
    /// `on_lost` is called with `generation` once the signal fires.  It is not
    /// called if the watch is dropped first.
    pub fn spawn<F, Fut>(signal: LinkLostSignal, generation: Uuid, on_lost: F) -> Self
    where
        F: FnOnce(Uuid) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            signal.fired().await;
            debug!(%generation, "link-lost signal fired");
            on_lost(generation).await;
        });
        Self {
            generation,
            task: Some(task),
        }
    }

    /// Identifies the connected interval this watch belongs to.
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    /// Releases the subscription without aborting the task.
    ///
    /// Only the teardown callback calls this; it is already running on the
    /// watch task and must be allowed to finish.
    pub fn detach(mut self) {
        self.task.take();
    }
}

impl Drop for LinkWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
