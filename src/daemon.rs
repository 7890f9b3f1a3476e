// CLASSIFICATION: COMMUNITY
// Filename: daemon.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Cooperative timer loop for one host process.
//!
//! Four timers share a single thread: lease heartbeat, identity file
//! watcher, active quota monitor and the decision loop. Each fires in turn
//! and runs to completion; nothing overlaps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::coord::{ChangeWatcher, LeaderLease};
use crate::identity::IdentityStore;
use crate::switch::{DecisionLoop, TickOutcome};

/// Longest uninterrupted sleep, bounding shutdown latency.
const MAX_NAP: Duration = Duration::from_millis(250);

/// Timer cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub heartbeat: Duration,
    pub watch: Duration,
    pub refresh: Duration,
}

impl Cadence {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            heartbeat: cfg.tuning.heartbeat(),
            watch: cfg.tuning.watch_interval(),
            refresh: Duration::from_secs(cfg.refresh_interval_seconds.max(1)),
        }
    }
}

struct Timer {
    period: Duration,
    due: Instant,
}

impl Timer {
    fn new(period: Duration, now: Instant) -> Self {
        Self { period, due: now }
    }

    fn take(&mut self, now: Instant) -> bool {
        if now < self.due {
            return false;
        }
        self.due = now + self.period;
        true
    }
}

/// Cloneable stop flag for [`Daemon::run`].
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for signal handler registration.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

pub struct Daemon<'a> {
    lease: &'a LeaderLease,
    store: &'a IdentityStore,
    watcher: ChangeWatcher,
    decision: DecisionLoop<'a>,
    cadence: Cadence,
    leading: bool,
}

impl<'a> Daemon<'a> {
    pub fn new(
        lease: &'a LeaderLease,
        store: &'a IdentityStore,
        decision: DecisionLoop<'a>,
        cadence: Cadence,
    ) -> Self {
        Self {
            lease,
            store,
            watcher: ChangeWatcher::new(store.path()),
            decision,
            cadence,
            leading: false,
        }
    }

    pub fn decision(&self) -> &DecisionLoop<'a> {
        &self.decision
    }

    fn heartbeat(&mut self) {
        match self.lease.heartbeat() {
            Ok(leading) => {
                if leading != self.leading {
                    info!(
                        "{} is now {}",
                        self.lease.id(),
                        if leading { "leader" } else { "follower" }
                    );
                }
                self.leading = leading;
            }
            Err(err) => warn!("lease heartbeat failed: {err}"),
        }
    }

    fn watch(&mut self) {
        if self.watcher.poll() {
            debug!("{} changed on disk", self.store.path().display());
            self.store.invalidate();
        }
    }

    fn monitor(&mut self) {
        if let Err(err) = self.decision.refresh_active() {
            warn!("active quota refresh failed: {err}");
        }
    }

    /// Heartbeat, monitor and a single decision tick.
    pub fn run_once(&mut self) -> TickOutcome {
        self.heartbeat();
        self.monitor();
        self.decision.tick()
    }

    /// Drive all timers until `shutdown` is triggered, then resign.
    pub fn run(&mut self, shutdown: &Shutdown) {
        let start = Instant::now();
        let mut heartbeat = Timer::new(self.cadence.heartbeat, start);
        let mut watch = Timer::new(self.cadence.watch, start);
        let mut monitor = Timer::new(self.cadence.refresh, start);
        let mut decide = Timer::new(self.decision.policy().check_interval, start);
        info!("{} started", self.lease.id());

        while !shutdown.is_triggered() {
            let now = Instant::now();
            if heartbeat.take(now) {
                self.heartbeat();
            }
            if watch.take(now) {
                self.watch();
            }
            if monitor.take(now) {
                self.monitor();
                if self.decision.expedited() {
                    decide.due = now + self.decision.next_delay();
                }
            }
            if decide.take(Instant::now()) {
                let outcome = self.decision.tick();
                debug!(
                    "tick: {outcome:?} ({} declined this session)",
                    self.decision.memo().len()
                );
                decide.due = Instant::now() + self.decision.next_delay();
            }
            let next = [heartbeat.due, watch.due, monitor.due, decide.due]
                .into_iter()
                .min()
                .unwrap_or(now);
            let nap = next.saturating_duration_since(Instant::now()).min(MAX_NAP);
            if !nap.is_zero() {
                thread::sleep(nap);
            }
        }

        if self.lease.is_leader() {
            if let Err(err) = self.lease.resign() {
                warn!("resign failed: {err}");
            }
        }
        info!("{} stopped", self.lease.id());
    }
}
