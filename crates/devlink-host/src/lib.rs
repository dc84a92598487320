//! devlink-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does devlink-host do? (for beginners)
//!
//! The host keeps track of every endpoint through which the remote device can
//! be reached, remembers which one the user picked, and owns the single live
//! connection to the device.
//!
//! 1. The USB probe lists authorized USB devices and watches for hot-plug.
//! 2. The network probe checks a local WebSocket endpoint every few seconds.
//! 3. The `DeviceManager` merges both reports into one registry snapshot and
//!    keeps the user's selection valid.
//! 4. `connect()` hands the selected backend to a `Connector`, which performs
//!    the device handshake and returns a `Session`.
//! 5. While connected, a link watch listens for the session's "link lost"
//!    signal and returns the manager to idle when it fires.

/// Application layer: coordinator, lifecycle state machine, link watch, credentials.
pub mod application;

/// Infrastructure layer: probes, config, UI bridge.
pub mod infrastructure;
