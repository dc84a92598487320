//! devlink: backend discovery command-line tool.
//!
//! Runs the USB and network probes that the device manager uses and shows
//! what they find.  The device protocol itself is supplied by applications
//! embedding `devlink_host`, so this binary discovers and authorizes devices
//! but does not connect to them.
//!
//! # Usage
//!
//! ```text
//! devlink [OPTIONS] [COMMAND]
//!
//! Commands:
//!   monitor    Run both probes and log every change until Ctrl-C (default)
//!   list       Run one probe round and print the backends
//!   authorize  Pick an attached USB device and remember it as authorized
//!
//! Options:
//!   --config <PATH>           Config file [default: platform config dir]
//!   --endpoint <URL>          Network endpoint to probe
//!   --probe-interval <SECS>   Network probe interval
//!   --no-usb                  Disable the USB probe
//!   --no-network              Disable the network probe
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                  | Overrides          |
//! |---------------------------|--------------------|
//! | `DEVLINK_CONFIG`          | `--config`         |
//! | `DEVLINK_ENDPOINT`        | `--endpoint`       |
//! | `DEVLINK_PROBE_INTERVAL`  | `--probe-interval` |
//! | `RUST_LOG`                | `[general] log_level` |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devlink_core::{Backend, DeviceError, RegistrySnapshot};
use devlink_host::application::credentials::CredentialStore;
use devlink_host::application::discovery::{spawn_discovery, DiscoveryConfig, ProbeEvent};
use devlink_host::application::lifecycle::{LifecycleController, LifecycleEvent};
use devlink_host::application::manager::DeviceManager;
use devlink_host::application::session::{Connector, Session};
use devlink_host::infrastructure::network::{
    network_report, EndpointProber, NetworkProbeConfig, WsEndpointProber,
};
use devlink_host::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, AppConfig,
};
use devlink_host::infrastructure::usb::{self, serial::SerialUsbHost, UsbHost};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Backend discovery for remote devices over USB and a local WebSocket bridge.
#[derive(Debug, Parser)]
#[command(name = "devlink", version)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "DEVLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Network endpoint to probe (overrides `[network] endpoint`).
    #[arg(long, env = "DEVLINK_ENDPOINT")]
    endpoint: Option<String>,

    /// Seconds between network probes (overrides `[network] probe_interval_secs`).
    #[arg(long, env = "DEVLINK_PROBE_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
    probe_interval: Option<u64>,

    /// Disable the USB probe.
    #[arg(long)]
    no_usb: bool,

    /// Disable the network probe.
    #[arg(long)]
    no_network: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Run both probes and log every change until Ctrl-C.
    Monitor,
    /// Run one probe round and print the backends.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Pick an attached USB device and remember it as authorized.
    Authorize,
}

impl Cli {
    /// The config file path: `--config`, or the platform default.
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given and no platform config dir"),
        }
    }

    /// Applies the command-line overrides on top of the loaded config.
    ///
    /// Overrides last for this run only; nothing here is saved.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.network.endpoint = endpoint.clone();
        }
        if let Some(secs) = self.probe_interval {
            config.network.probe_interval_secs = secs;
        }
        if self.no_usb {
            config.usb.enabled = false;
        }
        if self.no_network {
            config.network.enabled = false;
        }
    }
}

fn discovery_config(config: &AppConfig) -> DiscoveryConfig {
    DiscoveryConfig {
        usb_enabled: config.usb.enabled,
        usb_poll_interval: config.usb.poll_interval(),
        network: config.network.enabled.then(|| NetworkProbeConfig {
            endpoint: config.network.endpoint.clone(),
            interval: config.network.probe_interval(),
        }),
    }
}

/// Connector used by the CLI.  Every attempt is refused.
struct DiscoveryOnly;

#[async_trait]
impl Connector for DiscoveryOnly {
    async fn connect(
        &self,
        backend: &Backend,
        _credentials: &CredentialStore,
    ) -> Result<Arc<dyn Session>, DeviceError> {
        Err(DeviceError::TransportFailure(format!(
            "the devlink CLI does not speak the device protocol; cannot connect to {}",
            backend.label()
        )))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path()?;
    let loaded = load_config_from(&config_path);

    // `RUST_LOG` wins; otherwise the configured level.
    let level = loaded
        .as_ref()
        .map(|c| c.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut config =
        loaded.with_context(|| format!("failed to load config from {}", config_path.display()))?;
    cli.apply_overrides(&mut config);
    info!("using config {}", config_path.display());

    let host = Arc::new(SerialUsbHost::new(config.usb.authorized.clone()));

    match cli.command.clone().unwrap_or(Command::Monitor) {
        Command::Monitor => monitor(host, &config).await,
        Command::List { json } => list(host, &config, json).await,
        Command::Authorize => authorize(host, config.usb.enabled, &config_path).await,
    }
}

fn make_manager(host: Arc<dyn UsbHost>) -> Arc<DeviceManager> {
    let controller = LifecycleController::new(Arc::new(DiscoveryOnly), CredentialStore::process_wide());
    DeviceManager::new(controller, host)
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn monitor(host: Arc<SerialUsbHost>, config: &AppConfig) -> anyhow::Result<()> {
    let manager = make_manager(host);
    let prober: Arc<dyn EndpointProber> =
        Arc::new(WsEndpointProber::new(config.network.connect_timeout()));

    let mut snapshots = manager.subscribe_snapshot();
    let mut selection = manager.subscribe_selection();
    let mut warnings = manager.subscribe_warnings();
    let mut events = manager.subscribe_events();
    for warning in manager.warnings() {
        warn!("{}", warning.message());
    }

    let discovery = spawn_discovery(Arc::clone(&manager), prober, discovery_config(config)).await;
    print_snapshot(&manager.snapshot(), manager.selection().as_ref());
    info!("devlink monitoring.  Press Ctrl-C to exit.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            Ok(()) = snapshots.changed() => {
                let snapshot = snapshots.borrow_and_update().clone();
                print_snapshot(&snapshot, manager.selection().as_ref());
            }
            Ok(()) = selection.changed() => {
                match selection.borrow_and_update().as_ref() {
                    Some(backend) => info!("selection: {}", backend.label()),
                    None => info!("selection: none"),
                }
            }
            Ok(()) = warnings.changed() => {
                for warning in warnings.borrow_and_update().iter() {
                    warn!("{}", warning.message());
                }
            }
            Ok(event) = events.recv() => {
                if let LifecycleEvent::DeviceDisconnected { backend } = event {
                    warn!("device disconnected: {}", backend.label());
                }
            }
        }
    }

    discovery.shutdown();
    info!("devlink stopped");
    Ok(())
}

async fn list(host: Arc<SerialUsbHost>, config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let manager = make_manager(Arc::clone(&host) as Arc<dyn UsbHost>);

    if config.usb.enabled {
        let backends = usb::list_backends(host).await;
        manager
            .handle_probe_event(ProbeEvent::UsbListed {
                backends,
                select_hint: None,
            })
            .await;
    }
    if config.network.enabled {
        let prober = WsEndpointProber::new(config.network.connect_timeout());
        let reachable = prober.probe(&config.network.endpoint).await;
        manager
            .handle_probe_event(ProbeEvent::NetworkListed(network_report(
                &config.network.endpoint,
                reachable,
            )))
            .await;
    }

    let snapshot = manager.snapshot();
    if json {
        let text = serde_json::to_string_pretty(&snapshot).context("failed to encode backends")?;
        println!("{text}");
    } else {
        print_snapshot(&snapshot, manager.selection().as_ref());
    }
    Ok(())
}

async fn authorize(
    host: Arc<SerialUsbHost>,
    usb_enabled: bool,
    config_path: &Path,
) -> anyhow::Result<()> {
    if !usb_enabled {
        anyhow::bail!("USB is disabled; set [usb] enabled = true and drop --no-usb to authorize devices");
    }
    let backend = usb::request_new_backend(host)
        .await
        .context("USB authorization failed")?;

    if remember_authorization(config_path, &backend.id)? {
        println!("authorized {}", backend.label());
    } else {
        println!("{} was already authorized", backend.label());
    }
    Ok(())
}

/// Adds `serial` to `[usb] authorized` in the file at `path`.
///
/// The file is read again so that overrides given for this run are never
/// written back.  Returns `false` if the serial was already listed.
fn remember_authorization(path: &Path, serial: &str) -> anyhow::Result<bool> {
    let mut on_disk = load_config_from(path)
        .with_context(|| format!("failed to reload config from {}", path.display()))?;
    if !on_disk.usb.remember(serial) {
        return Ok(false);
    }
    save_config_to(path, &on_disk)
        .with_context(|| format!("failed to save config to {}", path.display()))?;
    Ok(true)
}

fn print_snapshot(snapshot: &RegistrySnapshot, selection: Option<&Backend>) {
    if snapshot.is_empty() {
        println!("no backends");
        return;
    }
    for backend in snapshot {
        let marker = match selection {
            Some(selected) if selected.same_endpoint(backend) => '*',
            _ => ' ',
        };
        println!("{marker} {:<8} {}", backend.kind.to_string(), backend.label());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_defaults_to_no_subcommand() {
        let cli = Cli::parse_from(["devlink"]);
        assert_eq!(cli.command, None);
        assert!(!cli.no_usb);
        assert!(!cli.no_network);
    }

    #[test]
    fn test_cli_list_json_flag() {
        let cli = Cli::parse_from(["devlink", "list", "--json"]);
        assert_eq!(cli.command, Some(Command::List { json: true }));
    }

    #[test]
    fn test_cli_authorize_subcommand() {
        let cli = Cli::parse_from(["devlink", "authorize"]);
        assert_eq!(cli.command, Some(Command::Authorize));
    }

    #[test]
    fn test_explicit_config_path_is_used() {
        let cli = Cli::parse_from(["devlink", "--config", "/tmp/devlink.toml"]);
        assert_eq!(cli.config_path().unwrap(), PathBuf::from("/tmp/devlink.toml"));
    }

    #[test]
    fn test_overrides_replace_endpoint_and_interval() {
        // Arrange
        let cli = Cli::parse_from([
            "devlink",
            "--endpoint",
            "ws://127.0.0.1:9000",
            "--probe-interval",
            "2",
        ]);
        let mut config = AppConfig::default();

        // Act
        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.network.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(config.network.probe_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_no_network_disables_network_probe() {
        let cli = Cli::parse_from(["devlink", "--no-network"]);
        let mut config = AppConfig::default();

        cli.apply_overrides(&mut config);

        assert!(discovery_config(&config).network.is_none());
    }

    #[test]
    fn test_discovery_config_uses_configured_intervals() {
        let config = AppConfig::default();

        let discovery = discovery_config(&config);

        assert!(discovery.usb_enabled);
        assert_eq!(discovery.usb_poll_interval, Duration::from_secs(1));
        let network = discovery.network.expect("network probe enabled by default");
        assert_eq!(network.endpoint, "ws://localhost:15555");
        assert_eq!(network.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_probe_interval_flag_is_rejected() {
        let result = Cli::try_parse_from(["devlink", "--probe-interval", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_authorization_does_not_persist_run_overrides() {
        // Arrange: a config on disk, and a run with overrides applied
        let path = std::env::temp_dir()
            .join(format!("devlink-cli-test-{}", uuid::Uuid::new_v4()))
            .join("config.toml");
        save_config_to(&path, &AppConfig::default()).unwrap();
        let cli = Cli::parse_from([
            "devlink",
            "--no-usb",
            "--endpoint",
            "ws://example.invalid:1",
            "authorize",
        ]);
        let mut effective = load_config_from(&path).unwrap();
        cli.apply_overrides(&mut effective);
        assert!(!effective.usb.enabled);

        // Act
        let added = remember_authorization(&path, "0123456789ABCDEF").unwrap();
        let again = remember_authorization(&path, "0123456789ABCDEF").unwrap();

        // Assert
        assert!(added);
        assert!(!again);
        let saved = load_config_from(&path).unwrap();
        assert!(saved.usb.enabled);
        assert_eq!(saved.network.endpoint, "ws://localhost:15555");
        assert_eq!(saved.usb.authorized, vec!["0123456789ABCDEF".to_string()]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("example.invalid"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_authorize_refuses_when_usb_disabled() {
        let host = Arc::new(SerialUsbHost::new(Vec::new()));
        let path = std::env::temp_dir().join("devlink-unused").join("config.toml");

        let result = authorize(host, false, &path).await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cli_connector_refuses_every_attempt() {
        let result = DiscoveryOnly
            .connect(&Backend::usb("A", None), &CredentialStore::generate())
            .await;
        assert!(matches!(result, Err(DeviceError::TransportFailure(_))));
    }
}
