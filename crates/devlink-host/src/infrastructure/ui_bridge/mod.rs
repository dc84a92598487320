//! UI command bridge: exposes the device manager to a presentation layer.
//!
//! Every command is an `async fn` that takes the shared [`AppState`] and
//! returns a [`CommandResult`], so a desktop shell or a local web UI can
//! register them as-is and serialise the result to JSON.
//!
//! # `CommandResult<T>` wrapper
//!
//! All commands return `CommandResult<T>` rather than `Result<T, E>`.  Every
//! response has the same shape, `{ success, data, error }`, so the frontend
//! can read `result.success` without a try/catch around the call.
//!
//! # Data Transfer Objects
//!
//! Internal types (`Backend`, `ConnectedDevice`, `Warning`) are converted to
//! plain serialisable DTOs here.  A change to a DTO must be mirrored in the
//! frontend's type definitions.

use std::sync::Arc;

use devlink_core::{Backend, DeviceError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::application::activate_service::{self, Activation, ServiceSpec};
use crate::application::lifecycle::ConnectedDevice;
use crate::application::manager::{DeviceManager, Warning};
use crate::infrastructure::storage::config::AppConfig;

// ── Shared application state ──────────────────────────────────────────────────

/// State shared between command invocations.
pub struct AppState {
    pub manager: Arc<DeviceManager>,
    /// The configuration the process was started with.
    pub config: Mutex<AppConfig>,
}

impl AppState {
    pub fn new(manager: Arc<DeviceManager>, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            manager,
            config: Mutex::new(config),
        })
    }
}

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// One backend as shown in the device picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDto {
    pub id: String,
    pub display_name: Option<String>,
    /// `"usb"` or `"network"`.
    pub kind: String,
    /// Picker label, `"<id> (<display_name>)"` or `"<id>"`.
    pub label: String,
}

impl From<&Backend> for BackendDto {
    fn from(b: &Backend) -> Self {
        Self {
            id: b.id.clone(),
            display_name: b.display_name.clone(),
            kind: b.kind.to_string(),
            label: b.label(),
        }
    }
}

/// Descriptive fields of the connected device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfoDto {
    pub backend: BackendDto,
    /// Protocol version as 8 hex digits.
    pub protocol_version: String,
    pub model: Option<String>,
    pub device: Option<String>,
}

impl From<&ConnectedDevice> for DeviceInfoDto {
    fn from(d: &ConnectedDevice) -> Self {
        let info = d.session.info();
        Self {
            backend: BackendDto::from(&d.backend),
            protocol_version: info.protocol_version_hex(),
            model: info.model,
            device: info.device,
        }
    }
}

/// A standing warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningDto {
    /// Stable key, passed back to `dismiss_warning`.
    pub kind: Warning,
    pub message: String,
}

/// A helper service to start on the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpecDto {
    pub process_name: String,
    pub script_path: String,
    pub script: String,
}

/// Unified response wrapper used by every command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize> From<Result<T, DeviceError>> for CommandResult<T> {
    fn from(result: Result<T, DeviceError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Returns the current registry snapshot in registry order.
pub async fn get_backends(state: Arc<AppState>) -> CommandResult<Vec<BackendDto>> {
    let snapshot = state.manager.snapshot();
    CommandResult::ok(snapshot.iter().map(BackendDto::from).collect())
}

/// Returns the selected backend, if any.
pub async fn get_selection(state: Arc<AppState>) -> CommandResult<Option<BackendDto>> {
    CommandResult::ok(state.manager.selection().as_ref().map(BackendDto::from))
}

/// Manual pick from the device picker.
pub async fn select_backend(state: Arc<AppState>, id: String) -> CommandResult<BackendDto> {
    state
        .manager
        .select(&id)
        .await
        .map(|b| BackendDto::from(&b))
        .into()
}

/// Opens the USB authorization prompt and selects the authorized device.
pub async fn request_usb_device(state: Arc<AppState>) -> CommandResult<BackendDto> {
    state
        .manager
        .request_new_usb()
        .await
        .map(|b| BackendDto::from(&b))
        .into()
}

/// Connects to the selected backend.
pub async fn connect_device(state: Arc<AppState>) -> CommandResult<DeviceInfoDto> {
    state
        .manager
        .connect()
        .await
        .map(|d| DeviceInfoDto::from(&d))
        .into()
}

/// Disconnects the connected device.  Succeeds when nothing is connected.
pub async fn disconnect_device(state: Arc<AppState>) -> CommandResult<()> {
    state.manager.disconnect().await.into()
}

/// Returns `"idle"`, `"connecting"` or `"connected"`.
pub async fn get_connection_state(state: Arc<AppState>) -> CommandResult<String> {
    CommandResult::ok(state.manager.state().to_string())
}

/// Returns the connected device's descriptive fields, or `None`.
pub async fn get_device_info(state: Arc<AppState>) -> CommandResult<Option<DeviceInfoDto>> {
    CommandResult::ok(state.manager.current_device().as_ref().map(DeviceInfoDto::from))
}

/// Returns the configuration the process was started with.
pub async fn get_config(state: Arc<AppState>) -> CommandResult<AppConfig> {
    CommandResult::ok(state.config.lock().await.clone())
}

pub async fn get_warnings(state: Arc<AppState>) -> CommandResult<Vec<WarningDto>> {
    let dtos = state
        .manager
        .warnings()
        .into_iter()
        .map(|w| WarningDto {
            kind: w,
            message: w.message().to_string(),
        })
        .collect();
    CommandResult::ok(dtos)
}

/// Dismisses a standing warning by its `kind` key (e.g. `"usb_unsupported"`).
pub async fn dismiss_warning(state: Arc<AppState>, kind: String) -> CommandResult<()> {
    match serde_json::from_value::<Warning>(serde_json::Value::String(kind.clone())) {
        Ok(warning) => {
            state.manager.dismiss_warning(warning).await;
            CommandResult::ok(())
        }
        Err(_) => CommandResult::err(format!("unknown warning: {kind}")),
    }
}

/// Starts a helper service on the connected device.
///
/// Returns `"already_running"` or `"started"`.
pub async fn activate_device_service(
    state: Arc<AppState>,
    spec: ServiceSpecDto,
) -> CommandResult<String> {
    let Some(device) = state.manager.current_device() else {
        return CommandResult::err("no device connected");
    };
    let spec = ServiceSpec::new(spec.process_name, spec.script_path, spec.script);
    match activate_service::activate(device.session.as_ref(), &spec).await {
        Ok(Activation::AlreadyRunning) => CommandResult::ok("already_running".to_string()),
        Ok(Activation::Started) => CommandResult::ok("started".to_string()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Stops a helper service on the connected device.
pub async fn stop_device_service(state: Arc<AppState>, process_name: String) -> CommandResult<()> {
    let Some(device) = state.manager.current_device() else {
        return CommandResult::err("no device connected");
    };
    let spec = ServiceSpec::new(process_name, String::new(), String::new());
    activate_service::stop(device.session.as_ref(), &spec).await;
    CommandResult::ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
