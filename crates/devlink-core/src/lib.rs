//! # devlink-core
//!
//! Shared library for devlink containing the backend model, the registry
//! merge, the selection reconciler and the error taxonomy used by every
//! transport.
//!
//! This crate has zero dependencies on OS APIs, sockets, or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! devlink connects a controlling host to one remote device.  The device can
//! be reachable over more than one *transport*: a directly attached USB link,
//! or a network endpoint on the local machine.  Each reachable endpoint is
//! called a **backend**.
//!
//! Two independent probes report which backends exist right now.  This crate
//! defines what happens to those reports:
//!
//! - **`domain::backend`** – The [`Backend`] value type and its [`BackendKind`].
//!
//! - **`domain::registry`** – Merges the USB list and the network list into one
//!   ordered [`RegistrySnapshot`] and decides when that snapshot has actually
//!   changed.
//!
//! - **`domain::selection`** – Maps the user's previous choice onto a fresh
//!   snapshot so the choice survives list refreshes.
//!
//! - **`domain::lifecycle`** – The three connection states a host can be in.
//!
//! - **`error`** – The failure taxonomy shared by the probes and the
//!   connection lifecycle.

pub mod domain;
pub mod error;

pub use domain::backend::{Backend, BackendKind};
pub use domain::lifecycle::ConnectionState;
pub use domain::registry::{merge, BackendRegistry, RegistrySnapshot};
pub use domain::selection::reconcile;
pub use error::{DeviceError, ProbeError};
