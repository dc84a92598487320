//! Mock connector and session for unit and integration testing.
//!
//! Allows tests to drive connect success, connect failure, a connect attempt
//! held in flight, and a lost link, without a physical device.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devlink_core::{Backend, DeviceError};
use tokio::sync::{mpsc, oneshot};

use super::{
    Connector, FileChannel, LinkLostSignal, LinkLostTrigger, RemoteProcess, Session, SessionError,
};
use crate::application::credentials::CredentialStore;

/// A file written through a [`MockSession`] file channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
}

#[derive(Default)]
struct SessionLog {
    exec_calls: Vec<(String, Vec<String>)>,
    exec_responses: HashMap<String, VecDeque<Result<String, SessionError>>>,
    spawned: Vec<String>,
    spawn_output: Vec<Vec<u8>>,
    files: Vec<WrittenFile>,
    open_channels: usize,
    closed: bool,
    close_error: Option<SessionError>,
}

/// A mock implementation of [`Session`].
pub struct MockSession {
    backend: Backend,
    trigger: LinkLostTrigger,
    log: Arc<Mutex<SessionLog>>,
}

impl MockSession {
    /// Creates a session bound to `backend`.
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            trigger: LinkLostTrigger::new(),
            log: Arc::new(Mutex::new(SessionLog::default())),
        }
    }

    /// The backend this session was created for.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Simulates the link dropping (cable pulled, daemon killed).
    pub fn trigger_link_lost(&self) {
        self.trigger.fire();
    }

    /// Queues responses for `command`.  The last response is repeated once
    /// the queue is down to one entry.  Unscripted commands return `""`.
    pub fn script_exec(&self, command: &str, responses: Vec<Result<String, SessionError>>) {
        let mut log = self.log.lock().expect("lock poisoned");
        log.exec_responses
            .insert(command.to_string(), responses.into_iter().collect());
    }

    /// Output chunks delivered on stdout by the next `remote_spawn`.
    pub fn script_spawn_output(&self, chunks: Vec<Vec<u8>>) {
        self.log.lock().expect("lock poisoned").spawn_output = chunks;
    }

    /// Makes the next `close()` fail with `err`.
    pub fn fail_close_with(&self, err: SessionError) {
        self.log.lock().expect("lock poisoned").close_error = Some(err);
    }

    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.log.lock().expect("lock poisoned").exec_calls.clone()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.log.lock().expect("lock poisoned").spawned.clone()
    }

    pub fn written_files(&self) -> Vec<WrittenFile> {
        self.log.lock().expect("lock poisoned").files.clone()
    }

    /// File channels opened but not yet disposed.
    pub fn open_channels(&self) -> usize {
        self.log.lock().expect("lock poisoned").open_channels
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().expect("lock poisoned").closed
    }
}

#[async_trait]
impl Session for MockSession {
    fn protocol_version(&self) -> u32 {
        0x0100_0001
    }

    fn model(&self) -> Option<String> {
        Some("MockModel".to_string())
    }

    fn device(&self) -> Option<String> {
        Some(format!("mock-{}", self.backend.id))
    }

    fn link_lost(&self) -> LinkLostSignal {
        self.trigger.signal()
    }

    async fn remote_exec(&self, command: &str, args: &[&str]) -> Result<String, SessionError> {
        let mut log = self.log.lock().expect("lock poisoned");
        if log.closed {
            return Err(SessionError::Closed);
        }
        log.exec_calls.push((
            command.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        match log.exec_responses.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(String::new())),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(String::new())),
            None => Ok(String::new()),
        }
    }

    async fn remote_spawn(&self, command: &str) -> Result<RemoteProcess, SessionError> {
        let chunks = {
            let mut log = self.log.lock().expect("lock poisoned");
            if log.closed {
                return Err(SessionError::Closed);
            }
            log.spawned.push(command.to_string());
            std::mem::take(&mut log.spawn_output)
        };
        let (out_tx, stdout) = mpsc::channel(chunks.len().max(1));
        let (_err_tx, stderr) = mpsc::channel(1);
        for chunk in chunks {
            let _ = out_tx.try_send(chunk);
        }
        Ok(RemoteProcess { stdout, stderr })
    }

    async fn file_channel(&self) -> Result<Box<dyn FileChannel>, SessionError> {
        let mut log = self.log.lock().expect("lock poisoned");
        if log.closed {
            return Err(SessionError::Closed);
        }
        log.open_channels += 1;
        Ok(Box::new(MockFileChannel {
            log: Arc::clone(&self.log),
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut log = self.log.lock().expect("lock poisoned");
        log.closed = true;
        match log.close_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct MockFileChannel {
    log: Arc<Mutex<SessionLog>>,
}

#[async_trait]
impl FileChannel for MockFileChannel {
    async fn write(&mut self, path: &str, contents: &[u8], mode: u32) -> Result<(), SessionError> {
        self.log.lock().expect("lock poisoned").files.push(WrittenFile {
            path: path.to_string(),
            contents: contents.to_vec(),
            mode,
        });
        Ok(())
    }

    async fn dispose(self: Box<Self>) -> Result<(), SessionError> {
        let mut log = self.log.lock().expect("lock poisoned");
        log.open_channels = log.open_channels.saturating_sub(1);
        Ok(())
    }
}

/// A mock implementation of [`Connector`].
///
/// Accepts every attempt unless outcomes are queued with [`MockConnector::reject_next`].
#[derive(Default)]
pub struct MockConnector {
    rejections: Mutex<VecDeque<DeviceError>>,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
    attempts: Mutex<Vec<Backend>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fingerprints: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next attempt fail with `err`.
    pub fn reject_next(&self, err: DeviceError) {
        self.rejections.lock().expect("lock poisoned").push_back(err);
    }

    /// Holds the next attempt in flight until the returned sender fires
    /// (or is dropped).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.hold.lock().expect("lock poisoned") = Some(rx);
        tx
    }

    /// Every backend an attempt was made for, in order.
    pub fn attempts(&self) -> Vec<Backend> {
        self.attempts.lock().expect("lock poisoned").clone()
    }

    /// Credential fingerprints presented by each attempt.
    pub fn fingerprints(&self) -> Vec<String> {
        self.fingerprints.lock().expect("lock poisoned").clone()
    }

    /// Every session handed out, in order.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().expect("lock poisoned").clone()
    }

    /// The most recent session handed out.
    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().expect("lock poisoned").last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        backend: &Backend,
        credentials: &CredentialStore,
    ) -> Result<Arc<dyn Session>, DeviceError> {
        self.attempts.lock().expect("lock poisoned").push(backend.clone());
        self.fingerprints
            .lock()
            .expect("lock poisoned")
            .push(credentials.fingerprint());

        let hold = self.hold.lock().expect("lock poisoned").take();
        if let Some(rx) = hold {
            let _ = rx.await;
        }

        if let Some(err) = self.rejections.lock().expect("lock poisoned").pop_front() {
            return Err(err);
        }

        let session = Arc::new(MockSession::new(backend.clone()));
        self.sessions
            .lock()
            .expect("lock poisoned")
            .push(Arc::clone(&session));
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_connector_accepts_by_default() {
        // Arrange
        let connector = MockConnector::new();
        let credentials = CredentialStore::generate();
        let backend = Backend::usb("A", None);

        // Act
        let session = connector.connect(&backend, &credentials).await;

        // Assert
        assert!(session.is_ok());
        assert_eq!(connector.attempts(), vec![backend]);
        assert_eq!(connector.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_connector_rejects_queued_attempt() {
        let connector = MockConnector::new();
        connector.reject_next(DeviceError::UserCancelled);
        let credentials = CredentialStore::generate();

        let result = connector.connect(&Backend::usb("A", None), &credentials).await;

        assert_eq!(result.err(), Some(DeviceError::UserCancelled));
        assert!(connector.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_mock_session_sticky_last_exec_response() {
        // Arrange
        let session = MockSession::new(Backend::usb("A", None));
        session.script_exec("pidof", vec![Ok(String::new()), Ok("42".to_string())]);

        // Act
        let first = session.remote_exec("pidof", &["agent"]).await.unwrap();
        let second = session.remote_exec("pidof", &["agent"]).await.unwrap();
        let third = session.remote_exec("pidof", &["agent"]).await.unwrap();

        // Assert
        assert_eq!(first, "");
        assert_eq!(second, "42");
        assert_eq!(third, "42");
        assert_eq!(session.exec_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_session_rejects_calls_after_close() {
        let session = MockSession::new(Backend::usb("A", None));
        session.close().await.unwrap();

        let result = session.remote_exec("ls", &[]).await;

        assert_eq!(result, Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn test_mock_file_channel_tracks_open_channels() {
        let session = MockSession::new(Backend::usb("A", None));

        let mut channel = session.file_channel().await.unwrap();
        channel.write("/tmp/x", b"hi", 0o644).await.unwrap();
        assert_eq!(session.open_channels(), 1);
        channel.dispose().await.unwrap();

        assert_eq!(session.open_channels(), 0);
        assert_eq!(session.written_files()[0].mode, 0o644);
    }
}
