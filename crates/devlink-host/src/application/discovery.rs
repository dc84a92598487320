//! Discovery wiring: runs both probes and pumps their reports into the manager.
//!
//! ```text
//! USB watcher thread ──UsbEvent──► usb pump task ──┐
//!                                                   ├─ProbeEvent─► event pump ──► DeviceManager
//! network probe task ───────────────────────────────┘
//! ```
//!
//! Both probes feed one `mpsc` channel, so each probe's reports reach the
//! manager in the order the probe produced them.

use std::collections::BTreeSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use devlink_core::Backend;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::manager::DeviceManager;
use crate::infrastructure::network::{run_network_probe, EndpointProber, NetworkProbeConfig};
use crate::infrastructure::usb::{self, UsbEvent};

/// One probe report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// Fresh USB enumeration.  `select_hint` names a device that was just
    /// attached or authorized and should become the selection.
    UsbListed {
        backends: Vec<Backend>,
        select_hint: Option<String>,
    },
    /// Fresh network probe result.
    NetworkListed(Vec<Backend>),
}

/// What to run.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Run the USB probe and hot-plug watcher.
    pub usb_enabled: bool,
    pub usb_poll_interval: Duration,
    /// Run the network probe; `None` disables it.
    pub network: Option<NetworkProbeConfig>,
}

/// Running discovery.  Call [`DiscoveryHandle::shutdown`] to stop it.
#[derive(Debug)]
pub struct DiscoveryHandle {
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryHandle {
    /// Stops the probes and the event pump.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Relaxed);
        for task in &self.tasks {
            task.abort();
        }
        info!("discovery stopped");
    }
}

/// Starts discovery for `manager`.
///
/// The initial USB enumeration is applied before this returns, so the
/// registry already holds the attached devices when the caller continues.
pub async fn spawn_discovery(
    manager: Arc<DeviceManager>,
    prober: Arc<dyn EndpointProber>,
    config: DiscoveryConfig,
) -> DiscoveryHandle {
    let running = Arc::new(AtomicBool::new(true));
    let (tx, mut rx) = mpsc::channel::<ProbeEvent>(64);
    let mut tasks = Vec::new();

    // ── USB ───────────────────────────────────────────────────────────────────
    let host = manager.usb_host();
    if config.usb_enabled && host.is_supported() {
        let backends = usb::list_backends(Arc::clone(&host)).await;
        // The watcher diffs its first poll against what was applied here.
        let baseline: BTreeSet<String> = backends.iter().map(|b| b.id.clone()).collect();
        manager
            .handle_probe_event(ProbeEvent::UsbListed {
                backends,
                select_hint: None,
            })
            .await;

        match usb::start_usb_watcher(
            Arc::clone(&host),
            baseline,
            config.usb_poll_interval,
            Arc::clone(&running),
        ) {
            Ok(mut usb_rx) => {
                let tx = tx.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(event) = usb_rx.recv().await {
                        let select_hint = match event {
                            UsbEvent::Attached(id) => Some(id),
                            UsbEvent::Detached(_) => None,
                        };
                        let backends = usb::list_backends(Arc::clone(&host)).await;
                        let report = ProbeEvent::UsbListed {
                            backends,
                            select_hint,
                        };
                        if tx.send(report).await.is_err() {
                            break;
                        }
                    }
                }));
            }
            Err(e) => error!("failed to start USB watcher: {e}"),
        }
    } else if config.usb_enabled {
        info!("USB probe inactive: host lacks USB support");
    }

    // ── Network ───────────────────────────────────────────────────────────────
    if let Some(network) = config.network {
        tasks.push(tokio::spawn(run_network_probe(
            prober,
            network,
            manager.subscribe_state(),
            tx.clone(),
            Arc::clone(&running),
        )));
    }
    drop(tx);

    // ── Event pump ────────────────────────────────────────────────────────────
    tasks.push(tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            manager.handle_probe_event(event).await;
        }
    }));

    DiscoveryHandle { running, tasks }
}
