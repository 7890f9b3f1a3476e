// CLASSIFICATION: COMMUNITY
// Filename: transfer.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Moving identities in and out of the pool as plain refresh secrets.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Credential, Identity, IdentityStore, StoreError};
use crate::remote::TokenExchange;

/// Refresh secrets issued by the identity provider share this prefix.
pub const REFRESH_SECRET_PREFIX: &str = "1//";

/// One exported identity; also accepted as batch input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedIdentity {
    #[serde(default)]
    pub label: String,
    #[serde(alias = "refresh_token")]
    pub refresh_secret: String,
}

/// Outcome of [`import_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub imported: Vec<Identity>,
    /// Masked secret and the reason it was rejected.
    pub failed: Vec<(String, String)>,
}

/// Parse batch input.
///
/// A JSON array may hold bare secrets or objects carrying `refresh_secret`
/// (or `refresh_token`) and an optional `label`. Anything that is not JSON is
/// split on newlines, commas and semicolons, keeping entries that look like
/// refresh secrets. Duplicates are dropped, first occurrence wins.
pub fn parse_refresh_secrets(input: &str) -> Vec<ExportedIdentity> {
    let mut entries = Vec::new();
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(secret) => entries.push(ExportedIdentity {
                        label: String::new(),
                        refresh_secret: secret,
                    }),
                    other => match serde_json::from_value::<ExportedIdentity>(other) {
                        Ok(entry) => entries.push(entry),
                        Err(err) => debug!("skipping batch entry: {err}"),
                    },
                }
            }
        }
        Ok(_) => warn!("batch input is JSON but not an array"),
        Err(_) => {
            entries.extend(
                input
                    .split(['\n', ',', ';'])
                    .map(str::trim)
                    .filter(|s| s.starts_with(REFRESH_SECRET_PREFIX))
                    .map(|s| ExportedIdentity {
                        label: String::new(),
                        refresh_secret: s.to_string(),
                    }),
            );
        }
    }
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| !e.refresh_secret.trim().is_empty() && seen.insert(e.refresh_secret.clone()));
    entries
}

/// Exchange each secret for an access secret and import it. One failure does
/// not stop the rest.
pub fn import_batch(
    store: &IdentityStore,
    tokens: &dyn TokenExchange,
    entries: &[ExportedIdentity],
    now_secs: i64,
) -> BatchReport {
    let mut report = BatchReport::default();
    for entry in entries {
        let secret = entry.refresh_secret.trim();
        let imported = tokens
            .refresh(secret)
            .map_err(|err| err.to_string())
            .and_then(|grant| {
                let credential = grant.apply(&Credential::new("", secret, 0), now_secs);
                store
                    .import(credential, &entry.label)
                    .map_err(|err| err.to_string())
            });
        match imported {
            Ok(identity) => report.imported.push(identity),
            Err(reason) => {
                warn!("batch import of {} failed: {reason}", mask(secret));
                report.failed.push((mask(secret), reason));
            }
        }
    }
    info!(
        "batch import: {} imported, {} failed",
        report.imported.len(),
        report.failed.len()
    );
    report
}

fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(12).collect();
    format!("{head}...")
}

impl IdentityStore {
    /// Label and refresh secret of the named identities, or of every identity
    /// when `ids` is empty. Unknown ids are an error.
    pub fn export(&self, ids: &[String]) -> Result<Vec<ExportedIdentity>, StoreError> {
        let identities = self.list()?;
        if let Some(missing) = ids.iter().find(|id| !identities.iter().any(|i| &i.id == *id)) {
            return Err(StoreError::NotFound(missing.clone()));
        }
        Ok(identities
            .into_iter()
            .filter(|i| ids.is_empty() || ids.contains(&i.id))
            .map(|i| ExportedIdentity {
                label: i.label,
                refresh_secret: i.credential.refresh_secret,
            })
            .collect())
    }
}
