// CLASSIFICATION: COMMUNITY
// Filename: store.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Identity table maintained as one JSON file in the data directory.
//!
//! Reads go through a short-lived in-memory cache. Every write reloads the
//! file under the [`FileMutex`] so read-modify-write sequences from different
//! processes never interleave.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::distr::Alphanumeric;
use rand::Rng;
use thiserror::Error;

use super::{Credential, Identity, QuotaSnapshot};
use crate::clock::now_secs;
use crate::coord::state::write_atomic;
use crate::coord::{FileMutex, LockError};

/// How long a loaded table is served from memory.
pub const CACHE_TTL: Duration = Duration::from_millis(2000);

/// Errors returned by [`IdentityStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity store io: {0}")]
    Io(#[from] io::Error),
    #[error("identity store {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("unknown identity {0}")]
    NotFound(String),
}

struct Cached {
    identities: Vec<Identity>,
    loaded_at: Instant,
}

/// Durable identity table.
pub struct IdentityStore {
    path: PathBuf,
    mutex: FileMutex,
    cache_ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>, mutex: FileMutex) -> Self {
        Self {
            path: path.into(),
            mutex,
            cache_ttl: CACHE_TTL,
            cache: Mutex::new(None),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All identities, served from cache when fresh.
    ///
    /// A failed read falls back to the last cached table when one exists.
    pub fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < self.cache_ttl {
                return Ok(cached.identities.clone());
            }
        }
        match self.load() {
            Ok(identities) => {
                *cache = Some(Cached {
                    identities: identities.clone(),
                    loaded_at: Instant::now(),
                });
                Ok(identities)
            }
            Err(err) => match cache.as_ref() {
                Some(cached) => {
                    warn!("serving cached identities after read failure: {err}");
                    Ok(cached.identities.clone())
                }
                None => Err(err),
            },
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.list()?.into_iter().find(|i| i.id == id))
    }

    pub fn find_by_refresh_secret(&self, secret: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|i| i.credential.refresh_secret == secret))
    }

    /// Insert or replace by id.
    pub fn upsert(&self, identity: Identity) -> Result<(), StoreError> {
        self.mutate(|table| {
            match table.iter_mut().find(|i| i.id == identity.id) {
                Some(existing) => *existing = identity,
                None => table.push(identity),
            }
            Ok(())
        })
    }

    /// Delete by id. Returns whether an entry was removed.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.mutate(|table| {
            let before = table.len();
            table.retain(|i| i.id != id);
            Ok(table.len() != before)
        })
    }

    /// Replace the quota snapshot wholesale.
    pub fn set_quota(&self, id: &str, snapshot: QuotaSnapshot) -> Result<(), StoreError> {
        self.update(id, |identity| identity.quota = Some(snapshot))
            .map(|_| ())
    }

    /// Edit one identity in place and return the stored result.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Identity, StoreError>
    where
        F: FnOnce(&mut Identity),
    {
        self.mutate(|table| {
            let identity = table
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            f(identity);
            Ok(identity.clone())
        })
    }

    /// Drop a `forbidden` snapshot so the identity is fetched again.
    pub fn clear_forbidden(&self, id: &str) -> Result<Identity, StoreError> {
        self.update(id, |identity| {
            if identity.is_forbidden() {
                identity.quota = None;
            }
        })
    }

    /// Add an identity from fresh credential material, or refresh the entry
    /// already holding the same refresh secret or label.
    pub fn import(&self, credential: Credential, label: &str) -> Result<Identity, StoreError> {
        let now = now_secs();
        self.mutate(|table| {
            let existing = table
                .iter()
                .position(|i| i.credential.refresh_secret == credential.refresh_secret)
                .or_else(|| table.iter().position(|i| !label.is_empty() && i.label == label));
            if let Some(idx) = existing {
                let identity = &mut table[idx];
                identity.credential = credential;
                identity.last_used = now;
                if identity.is_forbidden() {
                    identity.quota = None;
                }
                info!("refreshed credential for {}", identity.label);
                return Ok(identity.clone());
            }
            let mut identity = Identity::new(&generate_id(), label, credential, now);
            identity.priority = table.len() as i32;
            info!("imported identity {} ({})", identity.id, identity.label);
            table.push(identity.clone());
            Ok(identity)
        })
    }

    /// Force the next read to hit the file.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
        debug!("identity cache invalidated");
    }

    fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Identity>) -> Result<T, StoreError>,
    {
        self.mutex.with_lock(|| {
            let mut table = self.load()?;
            let out = f(&mut table)?;
            self.save(&table)?;
            *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(Cached {
                identities: table,
                loaded_at: Instant::now(),
            });
            Ok(out)
        })
    }

    fn load(&self) -> Result<Vec<Identity>, StoreError> {
        match fs::read(&self.path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(data) => serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, table: &[Identity]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(table).map_err(io::Error::from)?;
        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

fn generate_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ResourceQuota;
    use tempfile::tempdir;

    fn store(dir: &Path) -> IdentityStore {
        IdentityStore::new(
            dir.join("identities.json"),
            FileMutex::new(dir.join(".lock"), "test"),
        )
    }

    fn identity(id: &str) -> Identity {
        Identity::new(id, &format!("{id}@example"), Credential::new("a", &format!("1//{id}"), 0), 1)
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(store(dir.path()).list().unwrap().is_empty());
    }

    #[test]
    fn upsert_get_remove() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.upsert(identity("a")).unwrap();
        store.upsert(identity("b")).unwrap();
        let mut renamed = identity("a");
        renamed.label = "renamed".into();
        store.upsert(renamed).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.get("a").unwrap().unwrap().label, "renamed");
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn set_quota_unknown_identity() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let err = store
            .set_quota("ghost", QuotaSnapshot::new(vec![], 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn cache_hides_external_writes_until_invalidated() {
        let dir = tempdir().unwrap();
        let ours = store(dir.path()).with_cache_ttl(Duration::from_secs(60));
        let theirs = store(dir.path());
        ours.upsert(identity("a")).unwrap();
        assert_eq!(ours.list().unwrap().len(), 1);
        theirs.upsert(identity("b")).unwrap();
        assert_eq!(ours.list().unwrap().len(), 1);
        ours.invalidate();
        assert_eq!(ours.list().unwrap().len(), 2);
    }

    #[test]
    fn writes_merge_with_external_changes() {
        let dir = tempdir().unwrap();
        let ours = store(dir.path()).with_cache_ttl(Duration::from_secs(60));
        let theirs = store(dir.path());
        ours.upsert(identity("a")).unwrap();
        theirs.upsert(identity("b")).unwrap();
        ours.set_quota(
            "a",
            QuotaSnapshot::new(vec![ResourceQuota::new("claude", 50, "")], 2),
        )
        .unwrap();
        let all = theirs.list().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn import_dedupes_by_refresh_secret_and_label() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let first = store
            .import(Credential::new("a1", "1//r1", 100), "me@example")
            .unwrap();
        store
            .set_quota(&first.id, QuotaSnapshot::forbidden(5))
            .unwrap();
        let again = store
            .import(Credential::new("a2", "1//r2", 200), "me@example")
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.is_forbidden());
        assert_eq!(again.credential.refresh_secret, "1//r2");
        let other = store
            .import(Credential::new("b", "1//other", 100), "other@example")
            .unwrap();
        assert_ne!(other.id, first.id);
        assert_eq!(other.priority, 1);
    }

    #[test]
    fn corrupt_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.path(), b"[{oops").unwrap();
        assert!(matches!(store.list(), Err(StoreError::Corrupt { .. })));
        assert!(store.upsert(identity("a")).is_err());
        assert_eq!(fs::read(store.path()).unwrap(), b"[{oops");
    }
}
