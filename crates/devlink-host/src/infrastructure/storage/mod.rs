//! Persistent storage for the devlink host.

pub mod config;
