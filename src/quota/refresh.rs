// CLASSIFICATION: COMMUNITY
// Filename: refresh.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use log::{info, warn};
use thiserror::Error;

use super::normalize;
use crate::identity::{Identity, IdentityStore, QuotaSnapshot, StoreError};
use crate::remote::{QuotaFetch, QuotaSource, RemoteError, TokenExchange};

/// Errors from refreshing one identity's quota.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("credential refresh failed for {id}: {source}")]
    RefreshFailed { id: String, source: RemoteError },
    #[error("quota fetch failed for {id}: {source}")]
    Fetch { id: String, source: RemoteError },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Renew `identity`'s access secret when it is close to expiry and persist it.
pub fn ensure_fresh(
    store: &IdentityStore,
    tokens: &dyn TokenExchange,
    identity: &Identity,
    now_secs: i64,
) -> Result<Identity, RefreshError> {
    if !identity.credential.needs_refresh(now_secs) {
        return Ok(identity.clone());
    }
    let grant = tokens
        .refresh(&identity.credential.refresh_secret)
        .map_err(|source| RefreshError::RefreshFailed {
            id: identity.id.clone(),
            source,
        })?;
    let credential = grant.apply(&identity.credential, now_secs);
    Ok(store.update(&identity.id, |stored| stored.credential = credential)?)
}

/// Fetch, normalize and store a fresh snapshot for `identity`.
///
/// A 403 is recorded as a forbidden snapshot, not an error.
pub fn refresh_identity(
    store: &IdentityStore,
    tokens: &dyn TokenExchange,
    source: &dyn QuotaSource,
    identity: &Identity,
    now_secs: i64,
) -> Result<QuotaSnapshot, RefreshError> {
    let identity = ensure_fresh(store, tokens, identity, now_secs)?;
    let snapshot = match source.fetch(&identity.credential) {
        Ok(QuotaFetch::Quota(raw)) => normalize(&raw, now_secs),
        Ok(QuotaFetch::Forbidden) => {
            warn!("{} is forbidden by the remote service", identity.label);
            QuotaSnapshot::forbidden(now_secs)
        }
        Err(err) => {
            return Err(RefreshError::Fetch {
                id: identity.id.clone(),
                source: err,
            })
        }
    };
    store.set_quota(&identity.id, snapshot.clone())?;
    info!(
        "quota for {}: {}",
        identity.label,
        snapshot
            .resources
            .iter()
            .map(|r| format!("{}={}%", r.name, r.remaining_percent))
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(snapshot)
}
