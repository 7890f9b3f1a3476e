// CLASSIFICATION: COMMUNITY
// Filename: decision.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Leader-only control loop deciding when and where to switch.
//!
//! Each tick refreshes quota for every eligible identity, then walks the
//! active identity's configured thresholds in resource-name order. The first
//! violation with a better candidate the operator accepts is switched; at most
//! one switch happens per tick and per rate-limit window.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

use super::executor::SwitchExecutor;
use crate::clock::{now_millis, now_secs};
use crate::config::Config;
use crate::coord::{CoordError, FileMutex, LeaderLease, StateFile};
use crate::host::{HostBridge, HostEvent, SwitchProposal};
use crate::identity::{Identity, IdentityStore, QuotaSnapshot};
use crate::quota::{refresh_identity, QuotaDisplayCache, RefreshError};
use crate::remote::{QuotaSource, TokenExchange};

/// Tunables for [`DecisionLoop`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    pub enabled: bool,
    pub interactive: bool,
    /// Resource name to percentage floor; zero entries are ignored.
    pub thresholds: BTreeMap<String, u8>,
    pub check_interval: Duration,
    pub min_switch_interval: Duration,
    pub random_tie_break: bool,
    pub spike_drop_points: u8,
    pub hysteresis_band: u8,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DecisionPolicy {
    fn from(cfg: &Config) -> Self {
        Self {
            enabled: cfg.auto_switch.enabled,
            interactive: cfg.auto_switch.interactive,
            thresholds: cfg
                .auto_switch
                .active_thresholds()
                .map(|(name, t)| (name.to_string(), t))
                .collect(),
            check_interval: Duration::from_secs(cfg.auto_switch.check_interval_seconds.max(1)),
            min_switch_interval: cfg.tuning.min_switch_interval(),
            random_tie_break: cfg.tuning.random_tie_break,
            spike_drop_points: cfg.tuning.spike_drop_points,
            hysteresis_band: cfg.tuning.hysteresis_band,
        }
    }
}

/// `(identity, resource)` pairs the operator declined to switch away from.
/// Lives for the process only.
#[derive(Debug, Clone, Default)]
pub struct RejectionMemo {
    declined: HashSet<(String, String)>,
}

impl RejectionMemo {
    pub fn insert(&mut self, identity_id: &str, resource: &str) {
        self.declined
            .insert((identity_id.to_string(), resource.to_string()));
    }

    pub fn contains(&self, identity_id: &str, resource: &str) -> bool {
        self.declined
            .contains(&(identity_id.to_string(), resource.to_string()))
    }

    pub fn len(&self) -> usize {
        self.declined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declined.is_empty()
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotLeader,
    Disabled,
    /// No active identity could be determined.
    NoActive,
    /// Nothing below threshold, or nothing better to switch to.
    Idle,
    /// A switch was due but the last one is too recent.
    RateLimited { resource: String },
    Declined { resource: String, target_id: String },
    Switched {
        from_id: String,
        to_id: String,
        resource: String,
    },
    Failed { target_id: String, reason: String },
}

/// Identities tied for the best `resource` value strictly above both
/// `threshold` and `current`. Excludes `active_id`, disabled and forbidden
/// identities.
pub fn best_candidates<'i>(
    identities: &'i [Identity],
    active_id: &str,
    resource: &str,
    threshold: u8,
    current: u8,
) -> Vec<&'i Identity> {
    let floor = threshold.max(current);
    let scored: Vec<(&Identity, u8)> = identities
        .iter()
        .filter(|i| i.id != active_id && i.is_eligible())
        .filter_map(|i| i.percent_for(resource).map(|p| (i, p)))
        .filter(|(_, p)| *p > floor)
        .collect();
    let Some(best) = scored.iter().map(|(_, p)| *p).max() else {
        return Vec::new();
    };
    scored
        .into_iter()
        .filter(|(_, p)| *p == best)
        .map(|(i, _)| i)
        .collect()
}

/// Pick one of the tied best candidates.
///
/// Without random tie-breaking the lowest priority value wins.
pub fn select_candidate<'i>(
    candidates: &[&'i Identity],
    rng: &mut StdRng,
    random_tie_break: bool,
) -> Option<&'i Identity> {
    if random_tie_break {
        candidates.choose(rng).copied()
    } else {
        candidates.iter().min_by_key(|i| i.priority).copied()
    }
}

/// Persist the last switch under the file mutex.
pub fn record_switch(
    state: &StateFile,
    mutex: &FileMutex,
    target_id: &str,
) -> Result<(), CoordError> {
    mutex.with_lock(|| -> Result<(), CoordError> {
        state.update(|s| {
            s.last_switch_at = Some(now_millis());
            s.last_switch_target = Some(target_id.to_string());
        })?;
        Ok(())
    })
}

/// Collaborators a [`DecisionLoop`] works against.
pub struct DecisionContext<'a> {
    pub store: &'a IdentityStore,
    pub tokens: &'a dyn TokenExchange,
    pub quotas: &'a dyn QuotaSource,
    pub host: &'a dyn HostBridge,
    pub lease: &'a LeaderLease,
    pub state: &'a StateFile,
    pub mutex: &'a FileMutex,
}

pub struct DecisionLoop<'a> {
    ctx: DecisionContext<'a>,
    executor: SwitchExecutor<'a>,
    policy: DecisionPolicy,
    memo: RejectionMemo,
    display: QuotaDisplayCache,
    rng: StdRng,
    /// Active identity id and its lowest percentage at the last refresh.
    last_active_low: Option<(String, u8)>,
    expedite: bool,
    /// Millis of this process's last switch; holds even if recording failed.
    last_switch_at: Option<i64>,
}

impl<'a> DecisionLoop<'a> {
    pub fn new(
        ctx: DecisionContext<'a>,
        executor: SwitchExecutor<'a>,
        policy: DecisionPolicy,
    ) -> Self {
        let display = QuotaDisplayCache::new(policy.hysteresis_band);
        Self {
            ctx,
            executor,
            policy,
            memo: RejectionMemo::default(),
            display,
            rng: StdRng::from_os_rng(),
            last_active_low: None,
            expedite: false,
            last_switch_at: None,
        }
    }

    /// Replace the tie-break source, e.g. with a seeded generator.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn memo(&self) -> &RejectionMemo {
        &self.memo
    }

    pub fn executor(&self) -> &SwitchExecutor<'a> {
        &self.executor
    }

    /// Delay before the next tick. Zero once after a consumption spike.
    pub fn next_delay(&mut self) -> Duration {
        if std::mem::take(&mut self.expedite) {
            Duration::ZERO
        } else {
            self.policy.check_interval
        }
    }

    /// A spike was seen and the next tick should not wait.
    pub fn expedited(&self) -> bool {
        self.expedite
    }

    /// Refresh and publish the active identity's quota.
    ///
    /// Runs on every process regardless of leadership.
    pub fn refresh_active(&mut self) -> Result<Option<QuotaSnapshot>, RefreshError> {
        let active = match self.executor.active_identity() {
            Ok(Some(active)) => active,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("cannot determine active identity: {err}");
                return Ok(None);
            }
        };
        if !active.is_eligible() {
            return Ok(None);
        }
        let snapshot = refresh_identity(
            self.ctx.store,
            self.ctx.tokens,
            self.ctx.quotas,
            &active,
            now_secs(),
        )?;
        self.publish(&active.id, &snapshot);
        self.observe_active(&active.id, &snapshot);
        Ok(Some(snapshot))
    }

    fn publish(&mut self, identity_id: &str, snapshot: &QuotaSnapshot) {
        let shown = self.display.smooth(identity_id, snapshot);
        self.ctx.host.emit(HostEvent::QuotaUpdated {
            identity_id: identity_id.to_string(),
            snapshot: shown,
        });
    }

    /// Flag the next tick as immediate when the active identity's lowest
    /// value fell by the spike margin since the last observation.
    fn observe_active(&mut self, identity_id: &str, snapshot: &QuotaSnapshot) {
        let Some(low) = snapshot.lowest_percent() else {
            return;
        };
        if let Some((prev_id, prev_low)) = &self.last_active_low {
            if prev_id == identity_id
                && self.policy.spike_drop_points > 0
                && prev_low.saturating_sub(low) >= self.policy.spike_drop_points
            {
                info!("{identity_id} dropped from {prev_low}% to {low}%, checking now");
                self.expedite = true;
            }
        }
        self.last_active_low = Some((identity_id.to_string(), low));
    }

    fn refresh_all(&mut self) {
        let identities = match self.ctx.store.list() {
            Ok(identities) => identities,
            Err(err) => {
                warn!("identity list unavailable: {err}");
                return;
            }
        };
        for identity in identities.iter().filter(|i| i.is_eligible()) {
            match refresh_identity(
                self.ctx.store,
                self.ctx.tokens,
                self.ctx.quotas,
                identity,
                now_secs(),
            ) {
                Ok(snapshot) => self.publish(&identity.id, &snapshot),
                Err(err) => warn!("skipping {}: {err}", identity.label),
            }
        }
    }

    /// Newest of the shared switch record and this process's own last switch.
    fn rate_limited(&self) -> bool {
        let recorded = self.ctx.state.read().switch_record().map(|r| r.at_millis);
        let Some(at) = recorded.max(self.last_switch_at) else {
            return false;
        };
        let elapsed = now_millis().saturating_sub(at);
        elapsed >= 0 && (elapsed as u128) < self.policy.min_switch_interval.as_millis()
    }

    /// Persist the switch, retrying once. The local timestamp is kept either
    /// way so a lost record cannot reopen the rate-limit window.
    fn note_switch(&mut self, target_id: &str) {
        self.last_switch_at = Some(now_millis());
        let first = record_switch(self.ctx.state, self.ctx.mutex, target_id);
        if let Err(err) = first.or_else(|err| {
            debug!("recording switch to {target_id} failed, retrying: {err}");
            record_switch(self.ctx.state, self.ctx.mutex, target_id)
        }) {
            warn!("switch to {target_id} not recorded: {err}");
        }
    }

    /// One pass of the control loop.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.ctx.lease.is_leader() {
            return TickOutcome::NotLeader;
        }
        if !self.policy.enabled {
            return TickOutcome::Disabled;
        }
        self.refresh_all();

        let active = match self.executor.active_identity() {
            Ok(Some(active)) => active,
            Ok(None) => return TickOutcome::NoActive,
            Err(err) => {
                warn!("cannot determine active identity: {err}");
                return TickOutcome::NoActive;
            }
        };
        if let Some(quota) = &active.quota {
            self.observe_active(&active.id, quota);
        }
        let identities = match self.ctx.store.list() {
            Ok(identities) => identities,
            Err(err) => {
                warn!("identity list unavailable: {err}");
                return TickOutcome::Idle;
            }
        };

        let thresholds: Vec<(String, u8)> = self
            .policy
            .thresholds
            .iter()
            .filter(|(_, t)| **t > 0)
            .map(|(r, t)| (r.clone(), *t))
            .collect();
        let mut declined = None;
        for (resource, threshold) in thresholds {
            let Some(current) = active.percent_for(&resource) else {
                continue;
            };
            if current >= threshold {
                continue;
            }
            if self.memo.contains(&active.id, &resource) {
                debug!("{} {resource} below {threshold}% but declined earlier", active.id);
                continue;
            }
            let tied = best_candidates(&identities, &active.id, &resource, threshold, current);
            let Some(target) = select_candidate(&tied, &mut self.rng, self.policy.random_tie_break)
            else {
                debug!("{} {resource} at {current}%, no better identity", active.id);
                continue;
            };
            if self.rate_limited() {
                info!("{resource} below {threshold}% but last switch is too recent");
                return TickOutcome::RateLimited { resource };
            }
            let target_percent = target.percent_for(&resource).unwrap_or(0);
            let target_id = target.id.clone();
            if self.policy.interactive {
                let proposal = SwitchProposal {
                    from_id: active.id.clone(),
                    from_label: active.label.clone(),
                    to_id: target_id.clone(),
                    to_label: target.label.clone(),
                    resource: resource.clone(),
                    current_percent: current,
                    candidate_percent: target_percent,
                    threshold,
                };
                if !self.ctx.host.confirm_switch(&proposal) {
                    info!("switch away from {} on {resource} declined", active.id);
                    self.memo.insert(&active.id, &resource);
                    if declined.is_none() {
                        declined = Some(TickOutcome::Declined {
                            resource,
                            target_id,
                        });
                    }
                    continue;
                }
            }
            return match self.executor.switch_to(&target_id) {
                Ok(_) => {
                    self.note_switch(&target_id);
                    info!(
                        "switched {} -> {target_id} ({resource} {current}% -> {target_percent}%)",
                        active.id
                    );
                    TickOutcome::Switched {
                        from_id: active.id.clone(),
                        to_id: target_id,
                        resource,
                    }
                }
                Err(err) => TickOutcome::Failed {
                    target_id,
                    reason: err.to_string(),
                },
            };
        }
        declined.unwrap_or(TickOutcome::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Credential, ResourceQuota};

    fn ident(id: &str, claude: Option<u8>, priority: i32) -> Identity {
        let mut i = Identity::new(id, id, Credential::new("a", id, 0), 0);
        i.priority = priority;
        i.quota = claude.map(|p| QuotaSnapshot::new(vec![ResourceQuota::new("claude", p, "")], 0));
        i
    }

    #[test]
    fn candidates_beat_threshold_and_current() {
        let mut forbidden = ident("f", Some(99), 0);
        forbidden.quota = Some(QuotaSnapshot::forbidden(0));
        let mut disabled = ident("d", Some(99), 0);
        disabled.disabled = true;
        let pool = vec![
            ident("active", Some(8), 0),
            ident("low", Some(9), 0),
            ident("best1", Some(50), 0),
            ident("best2", Some(50), 0),
            ident("mid", Some(30), 0),
            ident("none", None, 0),
            forbidden,
            disabled,
        ];
        let ids: Vec<_> = best_candidates(&pool, "active", "claude", 10, 8)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["best1", "best2"]);
        assert!(best_candidates(&pool, "active", "claude", 60, 8).is_empty());
        assert!(best_candidates(&pool, "active", "gemini-pro", 10, 8).is_empty());
    }

    #[test]
    fn ties_spread_across_candidates() {
        let pool = vec![ident("x", Some(50), 1), ident("y", Some(50), 0)];
        let tied: Vec<&Identity> = pool.iter().collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();
        for _ in 0..64 {
            seen.insert(select_candidate(&tied, &mut rng, true).unwrap().id.clone());
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(select_candidate(&tied, &mut rng, false).unwrap().id, "y");
        assert!(select_candidate(&[], &mut rng, true).is_none());
    }

    #[test]
    fn memo_is_keyed_by_identity_and_resource() {
        let mut memo = RejectionMemo::default();
        memo.insert("a", "claude");
        assert!(memo.contains("a", "claude"));
        assert!(!memo.contains("a", "gemini-pro"));
        assert!(!memo.contains("b", "claude"));
        memo.insert("a", "claude");
        assert_eq!(memo.len(), 1);
        assert!(!memo.is_empty());
    }

    #[test]
    fn policy_drops_disabled_thresholds() {
        let mut cfg = Config::default();
        cfg.auto_switch.thresholds.insert("claude".into(), 10);
        cfg.auto_switch.thresholds.insert("gemini-pro".into(), 0);
        let policy = DecisionPolicy::from(&cfg);
        assert_eq!(policy.thresholds.len(), 1);
        assert_eq!(policy.check_interval, Duration::from_secs(30));
    }
}
