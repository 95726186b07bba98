//! Container watchdog for the Zulu control plane.
//!
//! Runs one polling loop per process: sample each configured container's
//! CPU/memory usage, check it against the hot-reloadable policy document,
//! and restart or stop containers that breach their ceilings. Every
//! sample, violation, and kill action is appended to the shared
//! [`zulu::audit`] chain; sustained-violation counters and kill history
//! survive a watchdog restart via a local SQLite state store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Watchdog-specific configuration layered on [`zulu::config::Config`].
pub mod config;
/// SQLite state database for strike counters and kill/reload history.
pub mod db;
/// The poll-tick state machine.
pub mod poll;
/// Bollard-backed CPU/memory sampling.
pub mod stats;
