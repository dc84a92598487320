//! Application layer of the devlink host.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `devlink-core`) and the infrastructure (USB, sockets, files).
//! Code here orchestrates domain objects to fulfil a user goal and talks to
//! the outside world through traits, so tests can swap in doubles.
//!
//! # Sub-modules
//!
//! - **`manager`**          – The coordinator: registry, selection, user actions.
//! - **`lifecycle`**        – The `Idle → Connecting → Connected` state machine.
//! - **`link_watch`**       – Bridges a session's link-lost signal back to the
//!   lifecycle.
//! - **`discovery`**        – Runs both probes and pumps their reports into the
//!   manager.
//! - **`session`**          – The `Connector` / `Session` abstractions and their
//!   test doubles.
//! - **`credentials`**      – Process-wide authorization key material.
//! - **`activate_service`** – Starts a helper process on a connected device.

pub mod activate_service;
pub mod credentials;
pub mod discovery;
pub mod lifecycle;
pub mod link_watch;
pub mod manager;
pub mod session;
