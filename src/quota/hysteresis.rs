// CLASSIFICATION: COMMUNITY
// Filename: hysteresis.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use std::collections::HashMap;

use crate::identity::{QuotaSnapshot, ResourceQuota};

/// Changes of at most this many points keep the previous value.
pub const HYSTERESIS_BAND: u8 = 1;

/// Suppress jitter of `band` points or less against `previous`.
///
/// Reset times always come from `next`.
pub fn apply_hysteresis(
    previous: &[ResourceQuota],
    next: &[ResourceQuota],
    band: u8,
) -> Vec<ResourceQuota> {
    next.iter()
        .map(|fresh| match previous.iter().find(|p| p.name == fresh.name) {
            Some(prev) if prev.remaining_percent.abs_diff(fresh.remaining_percent) <= band => {
                ResourceQuota {
                    remaining_percent: prev.remaining_percent,
                    ..fresh.clone()
                }
            }
            _ => fresh.clone(),
        })
        .collect()
}

/// Last values surfaced per identity.
#[derive(Debug, Clone, Default)]
pub struct QuotaDisplayCache {
    band: u8,
    shown: HashMap<String, Vec<ResourceQuota>>,
}

impl QuotaDisplayCache {
    pub fn new(band: u8) -> Self {
        Self {
            band,
            shown: HashMap::new(),
        }
    }

    /// Smooth `snapshot` against what was last shown for `identity_id` and
    /// remember the result.
    pub fn smooth(&mut self, identity_id: &str, snapshot: &QuotaSnapshot) -> QuotaSnapshot {
        let previous = self.shown.get(identity_id).map(Vec::as_slice).unwrap_or(&[]);
        let resources = apply_hysteresis(previous, &snapshot.resources, self.band);
        self.shown.insert(identity_id.to_string(), resources.clone());
        QuotaSnapshot {
            resources,
            ..snapshot.clone()
        }
    }

    pub fn forget(&mut self, identity_id: &str) {
        self.shown.remove(identity_id);
    }
}
