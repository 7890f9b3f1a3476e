// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Coordination between processes sharing one data directory.
//!
//! Two primitives share the directory: a [`LeaderLease`] deciding which
//! process runs the decision loop, and a [`FileMutex`] guarding every write
//! to shared files.

use std::io;

use thiserror::Error;

pub mod lease;
pub mod mutex;
pub mod state;
pub mod watch;

pub use lease::{LeaderLease, Lease, HEARTBEAT_INTERVAL, LEASE_TTL};
pub use mutex::{FileMutex, LockError, MutexGuard, MutexToken};
pub use state::{SharedState, StateFile, SwitchRecord};
pub use watch::ChangeWatcher;

/// Errors raised by coordination primitives.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("shared state io: {0}")]
    Io(#[from] io::Error),
}
