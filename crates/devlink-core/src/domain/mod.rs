//! Domain entities for devlink.
//!
//! Everything in here is a plain value or a pure function.  The async
//! coordinator in `devlink-host` owns the mutable state and calls into these
//! functions one event at a time.

/// Backend value type.
pub mod backend;

/// Connection lifecycle states.
pub mod lifecycle;

/// Merging probe reports into registry snapshots.
pub mod registry;

/// Carrying the user's choice across snapshot changes.
pub mod selection;
