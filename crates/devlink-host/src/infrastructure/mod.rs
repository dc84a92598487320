//! Infrastructure layer of the devlink host.
//!
//! Contains OS-facing adapters: USB enumeration, the WebSocket network probe,
//! file-system storage, and the UI command bridge.

pub mod network;
pub mod storage;
pub mod ui_bridge;
pub mod usb;
