// CLASSIFICATION: COMMUNITY
// Filename: lease.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Heartbeat lease electing one leader among processes sharing a data dir.
//!
//! The leader refreshes its heartbeat every [`HEARTBEAT_INTERVAL`]. A
//! heartbeat older than the lease TTL marks the holder dead and any process
//! may take over. Take-over re-checks the record while holding the file
//! mutex, so two challengers cannot both win the same stale lease.

use std::time::Duration;

use log::{debug, info, warn};

use super::mutex::{FileMutex, LockError};
use super::state::{SharedState, StateFile};
use super::CoordError;
use crate::clock::now_millis;

/// Heartbeat age after which the holder is considered dead.
pub const LEASE_TTL: Duration = Duration::from_secs(15);
/// Refresh/check cadence for leaders and followers.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Lease writes give up quickly and retry on the next heartbeat.
const LEASE_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Snapshot of the recorded lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder_id: String,
    /// Milliseconds since the Unix epoch.
    pub acquired_at: i64,
    /// Heartbeat plus TTL, milliseconds since the Unix epoch.
    pub expires_at: i64,
}

impl Lease {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}

/// One process's view of the leader lease.
#[derive(Debug, Clone)]
pub struct LeaderLease {
    id: String,
    state: StateFile,
    mutex: FileMutex,
    ttl: Duration,
}

impl LeaderLease {
    pub fn new(id: &str, state: StateFile, mutex: FileMutex) -> Self {
        Self {
            id: id.into(),
            state,
            mutex,
            ttl: LEASE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Recorded lease, if any holder is set.
    pub fn current(&self) -> Option<Lease> {
        lease_of(&self.state.read(), self.ttl)
    }

    /// True iff the recorded holder is this process. Pure read.
    pub fn is_leader(&self) -> bool {
        self.state.read().leader_id.as_deref() == Some(self.id.as_str())
    }

    /// Claim the lease if it is vacant, expired or already ours.
    pub fn try_become_leader(&self) -> Result<bool, CoordError> {
        let guard = match self.mutex.acquire(LEASE_LOCK_TIMEOUT) {
            Ok(guard) => guard,
            Err(LockError::Timeout { .. }) => {
                debug!("lease check skipped, state lock busy");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        let now = now_millis();
        let state = self.state.read();
        let claimable = match lease_of(&state, self.ttl) {
            None => true,
            Some(lease) => lease.holder_id == self.id || lease.is_expired(now),
        };
        if claimable {
            let previous = state.leader_id.clone();
            self.state.update(|s| {
                if s.leader_id.as_deref() != Some(self.id.as_str()) {
                    s.leader_since = Some(now);
                }
                s.leader_id = Some(self.id.clone());
                s.leader_heartbeat = Some(now);
            })?;
            if previous.as_deref() != Some(self.id.as_str()) {
                info!(
                    "{} became leader (previous holder {:?})",
                    self.id,
                    previous.unwrap_or_default()
                );
            }
        }
        guard.release()?;
        Ok(claimable)
    }

    /// One heartbeat cycle: the leader refreshes, followers take over a
    /// stale lease. Returns whether this process leads afterwards.
    pub fn heartbeat(&self) -> Result<bool, CoordError> {
        let state = self.state.read();
        match lease_of(&state, self.ttl) {
            Some(lease) if lease.holder_id == self.id => self.try_become_leader(),
            Some(lease) if !lease.is_expired(now_millis()) => Ok(false),
            Some(lease) => {
                info!("leader {} stopped heartbeating, taking over", lease.holder_id);
                self.try_become_leader()
            }
            None => self.try_become_leader(),
        }
    }

    /// Clear the holder so a follower is elected on its next check.
    pub fn resign(&self) -> Result<(), CoordError> {
        let guard = self.mutex.acquire(LEASE_LOCK_TIMEOUT)?;
        let state = self.state.read();
        if state.leader_id.as_deref() == Some(self.id.as_str()) {
            self.state.update(SharedState::clear_leader)?;
            info!("{} resigned leadership", self.id);
        } else {
            warn!("{} resign requested but does not hold the lease", self.id);
        }
        guard.release()?;
        Ok(())
    }
}

fn lease_of(state: &SharedState, ttl: Duration) -> Option<Lease> {
    let holder_id = state.leader_id.clone()?;
    let heartbeat = state.leader_heartbeat.unwrap_or(0);
    Some(Lease {
        holder_id,
        acquired_at: state.leader_since.unwrap_or(heartbeat),
        expires_at: heartbeat.saturating_add(ttl.as_millis() as i64),
    })
}
