//! Service activation on a connected device.
//!
//! Some device features need a helper process running on the device.  The
//! helper is started by pushing a launcher script and running it:
//!
//! 1. `pidof <process>`: if it prints a pid the helper is already running.
//! 2. Push the launcher script through a file channel with mode `0o777`, then
//!    dispose the channel.
//! 3. Spawn the script; its stdout and stderr are forwarded to the log.
//! 4. Poll `pidof <process>` once per poll interval until it prints a pid, or
//!    fail once the start timeout has elapsed.
//!
//! Stopping runs `killall <process>` and ignores the result.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::{RemoteProcess, Session, SessionError};

/// Errors raised while activating a service.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActivationError {
    /// A session operation failed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The process did not show up in time.
    #[error("{process} did not start within {timeout:?}")]
    Timeout { process: String, timeout: Duration },
}

/// Outcome of a successful [`activate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The process was already running; nothing was pushed.
    AlreadyRunning,
    /// The launcher was pushed and the process came up.
    Started,
}

/// What to start and how to recognise it.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Name the running process shows up as in `pidof`.
    pub process_name: String,
    /// Where the launcher script is written on the device.
    pub script_path: String,
    /// Launcher script contents.
    pub script: String,
    pub poll_interval: Duration,
    pub start_timeout: Duration,
}

impl ServiceSpec {
    /// Unix permissions of the pushed launcher.
    pub const SCRIPT_MODE: u32 = 0o777;

    /// A spec with the default one-second poll and twenty-second timeout.
    pub fn new(
        process_name: impl Into<String>,
        script_path: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            script_path: script_path.into(),
            script: script.into(),
            poll_interval: Duration::from_secs(1),
            start_timeout: Duration::from_secs(20),
        }
    }
}

/// Returns `true` when `pidof` printed a pid.
async fn is_running(session: &dyn Session, process: &str) -> Result<bool, SessionError> {
    let output = session.remote_exec("pidof", &[process]).await?;
    Ok(!output.trim().is_empty())
}

/// Starts the service described by `spec` unless it is already running.
pub async fn activate(
    session: &dyn Session,
    spec: &ServiceSpec,
) -> Result<Activation, ActivationError> {
    if is_running(session, &spec.process_name).await? {
        info!("{} is already running", spec.process_name);
        return Ok(Activation::AlreadyRunning);
    }

    let mut channel = session.file_channel().await?;
    let written = channel
        .write(&spec.script_path, spec.script.as_bytes(), ServiceSpec::SCRIPT_MODE)
        .await;
    let disposed = channel.dispose().await;
    written?;
    disposed?;
    debug!("pushed launcher to {}", spec.script_path);

    let process = session.remote_spawn(&spec.script_path).await?;
    forward_output(spec.process_name.clone(), process);

    info!("waiting for {} ...", spec.process_name);
    let started = Instant::now();
    loop {
        tokio::time::sleep(spec.poll_interval).await;
        if is_running(session, &spec.process_name).await? {
            info!("{} is running", spec.process_name);
            return Ok(Activation::Started);
        }
        if started.elapsed() > spec.start_timeout {
            warn!("{} did not start in time", spec.process_name);
            return Err(ActivationError::Timeout {
                process: spec.process_name.clone(),
                timeout: spec.start_timeout,
            });
        }
    }
}

/// Stops the service.  Failures (typically "no process found") are ignored.
pub async fn stop(session: &dyn Session, spec: &ServiceSpec) {
    if let Err(e) = session.remote_exec("killall", &[&spec.process_name]).await {
        debug!("killall {} failed: {e}", spec.process_name);
    }
    info!("{} stopped", spec.process_name);
}

fn forward_output(process: String, mut remote: RemoteProcess) {
    tokio::spawn(async move {
        let mut stdout_open = true;
        let mut stderr_open = true;
        while stdout_open || stderr_open {
            tokio::select! {
                chunk = remote.stdout.recv(), if stdout_open => match chunk {
                    Some(bytes) => info!(target: "devlink::remote", "{process}: {}", String::from_utf8_lossy(&bytes).trim_end()),
                    None => stdout_open = false,
                },
                chunk = remote.stderr.recv(), if stderr_open => match chunk {
                    Some(bytes) => warn!(target: "devlink::remote", "{process}: {}", String::from_utf8_lossy(&bytes).trim_end()),
                    None => stderr_open = false,
                },
            }
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
