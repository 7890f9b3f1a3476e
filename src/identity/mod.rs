// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Identity records kept in the shared store.

use serde::{Deserialize, Serialize};

use credblob_codec::CredentialRecord;

mod store;
mod transfer;

pub use store::{IdentityStore, StoreError};
pub use transfer::{
    import_batch, parse_refresh_secrets, BatchReport, ExportedIdentity, REFRESH_SECRET_PREFIX,
};

/// Seconds before expiry at which a credential is treated as stale.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Secrets for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_secret: String,
    pub refresh_secret: String,
    /// Expiry, seconds since the Unix epoch.
    pub expires_at: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    credblob_codec::credential::BEARER.to_string()
}

impl Credential {
    pub fn new(access_secret: &str, refresh_secret: &str, expires_at: i64) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            expires_at,
            token_type: default_token_type(),
        }
    }

    /// True when the access secret is missing or expires within the refresh margin.
    pub fn needs_refresh(&self, now_secs: i64) -> bool {
        self.access_secret.is_empty() || self.expires_at < now_secs + REFRESH_MARGIN_SECS
    }

    /// Blob representation of this credential.
    pub fn to_record(&self) -> CredentialRecord {
        CredentialRecord {
            access_secret: self.access_secret.clone(),
            token_type: self.token_type.clone(),
            refresh_secret: self.refresh_secret.clone(),
            expires_at: self.expires_at.max(0) as u64,
        }
    }
}

impl From<&CredentialRecord> for Credential {
    fn from(record: &CredentialRecord) -> Self {
        let token_type = if record.token_type.is_empty() {
            default_token_type()
        } else {
            record.token_type.clone()
        };
        Self {
            access_secret: record.access_secret.clone(),
            refresh_secret: record.refresh_secret.clone(),
            expires_at: i64::try_from(record.expires_at).unwrap_or(i64::MAX),
            token_type,
        }
    }
}

/// Remaining quota for one canonical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    /// Integer percentage in `0..=100`.
    pub remaining_percent: u8,
    /// ISO-8601 reset instant, empty when unknown.
    #[serde(default)]
    pub reset_at: String,
}

impl ResourceQuota {
    pub fn new(name: &str, remaining_percent: u8, reset_at: &str) -> Self {
        Self {
            name: name.into(),
            remaining_percent: remaining_percent.min(100),
            reset_at: reset_at.into(),
        }
    }
}

/// Quota state captured by one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub resources: Vec<ResourceQuota>,
    pub captured_at: i64,
    /// Remote service denied access for this identity.
    #[serde(default)]
    pub forbidden: bool,
}

impl QuotaSnapshot {
    /// Build a snapshot, keeping the first entry for each resource name.
    pub fn new(resources: Vec<ResourceQuota>, captured_at: i64) -> Self {
        let mut unique: Vec<ResourceQuota> = Vec::with_capacity(resources.len());
        for resource in resources {
            if !unique.iter().any(|r| r.name == resource.name) {
                unique.push(resource);
            }
        }
        Self {
            resources: unique,
            captured_at,
            forbidden: false,
        }
    }

    /// Snapshot recorded when the service answers 403.
    pub fn forbidden(captured_at: i64) -> Self {
        Self {
            resources: Vec::new(),
            captured_at,
            forbidden: true,
        }
    }

    pub fn percent_for(&self, resource: &str) -> Option<u8> {
        self.resources
            .iter()
            .find(|r| r.name == resource)
            .map(|r| r.remaining_percent)
    }

    /// Lowest remaining percentage across resources.
    pub fn lowest_percent(&self) -> Option<u8> {
        self.resources.iter().map(|r| r.remaining_percent).min()
    }
}

/// One interchangeable credential set and its last known quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub label: String,
    pub credential: Credential,
    #[serde(default)]
    pub quota: Option<QuotaSnapshot>,
    /// Excluded from automatic switching.
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub last_used: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub priority: i32,
}

impl Identity {
    pub fn new(id: &str, label: &str, credential: Credential, now_secs: i64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            credential,
            quota: None,
            disabled: false,
            last_used: now_secs,
            created_at: now_secs,
            priority: 0,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        self.quota.as_ref().map(|q| q.forbidden).unwrap_or(false)
    }

    /// Enabled and not forbidden.
    pub fn is_eligible(&self) -> bool {
        !self.disabled && !self.is_forbidden()
    }

    pub fn percent_for(&self, resource: &str) -> Option<u8> {
        self.quota.as_ref().and_then(|q| q.percent_for(resource))
    }

    pub fn lowest_percent(&self) -> Option<u8> {
        self.quota.as_ref().and_then(QuotaSnapshot::lowest_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_first_resource_name() {
        let snapshot = QuotaSnapshot::new(
            vec![
                ResourceQuota::new("claude", 40, ""),
                ResourceQuota::new("claude", 90, ""),
                ResourceQuota::new("gemini-pro", 70, ""),
            ],
            1,
        );
        assert_eq!(snapshot.resources.len(), 2);
        assert_eq!(snapshot.percent_for("claude"), Some(40));
        assert_eq!(snapshot.lowest_percent(), Some(40));
    }

    #[test]
    fn forbidden_identity_is_not_eligible() {
        let mut identity = Identity::new("a", "a@example", Credential::new("x", "1//x", 0), 0);
        assert!(identity.is_eligible());
        identity.quota = Some(QuotaSnapshot::forbidden(5));
        assert!(!identity.is_eligible());
        assert_eq!(identity.lowest_percent(), None);
    }

    #[test]
    fn credential_refresh_margin() {
        let cred = Credential::new("x", "1//x", 1_000);
        assert!(!cred.needs_refresh(600));
        assert!(cred.needs_refresh(701));
        assert!(Credential::new("", "1//x", i64::MAX / 2).needs_refresh(0));
    }
}
