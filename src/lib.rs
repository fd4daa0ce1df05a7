//! postbox: per-user IMAP synchronization daemon.
//!
//! One long-lived worker per user keeps a `(last_uid, UIDVALIDITY)` cursor
//! consistent with the remote mailbox and hands every newly discovered
//! message to a downstream processor. Workers are crash-only: any failure
//! tears the session down completely and the daemon spawns a fresh worker,
//! whose start-up backoff absorbs repeated faults.
//!
//! ## Module Organization
//!
//! - `adapters/`: IMAP client capability and the SQLite user store
//! - `state/`: daemon registry, per-user error counters, work pool
//! - `engine/`: worker state machine, UID sync engine, backoff, stop token
//! - `services/`: downstream processor seam, metric emission
//! - `config/`: TOML configuration
//! - `types/`: user records and the central error type

pub mod adapters;
pub mod config;
pub mod engine;
pub mod services;
pub mod state;
pub mod types;

pub use config::AppConfig;
pub use state::Daemon;
pub use types::PostboxError;
