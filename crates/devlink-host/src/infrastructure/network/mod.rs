//! Network transport probe.
//!
//! A device bridge daemon can expose the device on a fixed local WebSocket
//! endpoint (`ws://localhost:15555` by default).  The probe checks that
//! endpoint periodically by opening a WebSocket connection and closing it
//! again right away.  A completed handshake means the endpoint is reachable
//! and it is reported as exactly one network backend; anything else reports an
//! empty list.
//!
//! # Suspension
//!
//! The daemon typically accepts only one client, so probing while a device is
//! connected (or while a connect attempt is in flight) could steal the link.
//! The probe loop therefore reads the lifecycle state before every attempt and
//! skips the tick while the state is busy.  A probe that was already running
//! when a connect started has its result discarded.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use devlink_core::{Backend, ConnectionState};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::discovery::ProbeEvent;

/// Display name given to the synthetic network backend.
pub const NETWORK_BACKEND_NAME: &str = "WebSocket";

/// Shortest probe interval the loop accepts; shorter values are raised to it.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(10);

/// Checks whether an endpoint is reachable.
#[async_trait]
pub trait EndpointProber: Send + Sync {
    /// Returns `true` when a connection to `endpoint` could be opened.
    async fn probe(&self, endpoint: &str) -> bool;
}

/// WebSocket connect-and-close prober.
#[derive(Debug, Clone)]
pub struct WsEndpointProber {
    connect_timeout: Duration,
}

impl WsEndpointProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl EndpointProber for WsEndpointProber {
    async fn probe(&self, endpoint: &str) -> bool {
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(endpoint),
        )
        .await;
        match attempt {
            Ok(Ok((mut ws, _response))) => {
                if let Err(e) = ws.close(None).await {
                    debug!("closing probe connection to {endpoint} failed: {e}");
                }
                true
            }
            Ok(Err(e)) => {
                debug!("network probe of {endpoint} failed: {e}");
                false
            }
            Err(_) => {
                debug!("network probe of {endpoint} timed out after {:?}", self.connect_timeout);
                false
            }
        }
    }
}

/// The backends reported for one probe result.
pub fn network_report(endpoint: &str, reachable: bool) -> Vec<Backend> {
    if reachable {
        vec![Backend::network(endpoint, Some(NETWORK_BACKEND_NAME.to_string()))]
    } else {
        Vec::new()
    }
}

/// Settings of the probe loop.
#[derive(Debug, Clone)]
pub struct NetworkProbeConfig {
    pub endpoint: String,
    pub interval: Duration,
}

/// Probes the endpoint every `config.interval` until `running` is cleared or
/// `tx` is closed.
///
/// The first attempt happens one interval after the loop starts.  Ticks are
/// skipped while `state` is busy.
pub async fn run_network_probe(
    prober: Arc<dyn EndpointProber>,
    config: NetworkProbeConfig,
    state: watch::Receiver<ConnectionState>,
    tx: mpsc::Sender<ProbeEvent>,
    running: Arc<AtomicBool>,
) {
    if config.interval < MIN_PROBE_INTERVAL {
        warn!(
            "network probe interval {:?} raised to {MIN_PROBE_INTERVAL:?}",
            config.interval
        );
    }
    let period = config.interval.max(MIN_PROBE_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "network probe checking {} every {:?}",
        config.endpoint, period
    );

    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        if state.borrow().is_busy() {
            continue;
        }

        let reachable = prober.probe(&config.endpoint).await;

        if state.borrow().is_busy() {
            debug!("connect started during network probe; result discarded");
            continue;
        }
        let event = ProbeEvent::NetworkListed(network_report(&config.endpoint, reachable));
        if tx.send(event).await.is_err() {
            break;
        }
    }

    debug!("network probe stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
