// CLASSIFICATION: COMMUNITY
// Filename: host.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Surface between the pool and the host application.

use log::{debug, info, warn};

use crate::identity::QuotaSnapshot;

/// Events emitted towards the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    QuotaUpdated {
        identity_id: String,
        snapshot: QuotaSnapshot,
    },
    SwitchCompleted {
        identity_id: String,
    },
    SwitchFailed {
        reason: String,
    },
}

/// A switch the decision loop wants the operator to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchProposal {
    pub from_id: String,
    pub from_label: String,
    pub to_id: String,
    pub to_label: String,
    pub resource: String,
    pub current_percent: u8,
    pub candidate_percent: u8,
    pub threshold: u8,
}

pub trait HostBridge {
    fn emit(&self, event: HostEvent);

    /// Ask the operator. `false` means declined.
    fn confirm_switch(&self, proposal: &SwitchProposal) -> bool;

    /// Ask the host to pick up a rewritten blob.
    fn request_reload(&self);

    /// Whether the shared blob may be rewritten right now.
    fn can_mutate(&self) -> bool;
}

/// Headless host: events go to the log, confirmations get a fixed answer.
#[derive(Debug, Clone)]
pub struct LogHost {
    approve: bool,
    notify: bool,
}

impl LogHost {
    pub fn new(approve: bool) -> Self {
        Self {
            approve,
            notify: true,
        }
    }

    /// Completed switches are logged at info only when `notify` is set.
    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }
}

impl HostBridge for LogHost {
    fn emit(&self, event: HostEvent) {
        match event {
            HostEvent::QuotaUpdated {
                identity_id,
                snapshot,
            } => {
                if snapshot.forbidden {
                    warn!("quota {identity_id}: forbidden");
                } else {
                    info!("quota {identity_id}: lowest {:?}%", snapshot.lowest_percent());
                }
            }
            HostEvent::SwitchCompleted { identity_id } if self.notify => {
                info!("switched to {identity_id}")
            }
            HostEvent::SwitchCompleted { identity_id } => debug!("switched to {identity_id}"),
            HostEvent::SwitchFailed { reason } => warn!("switch failed: {reason}"),
        }
    }

    fn confirm_switch(&self, p: &SwitchProposal) -> bool {
        info!(
            "{} {} at {}% (< {}%), proposing {} at {}%: {}",
            p.from_label,
            p.resource,
            p.current_percent,
            p.threshold,
            p.to_label,
            p.candidate_percent,
            if self.approve { "approved" } else { "declined" }
        );
        self.approve
    }

    fn request_reload(&self) {
        info!("host reload requested");
    }

    fn can_mutate(&self) -> bool {
        true
    }
}
