// CLASSIFICATION: COMMUNITY
// Filename: executor.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use std::fs;
use std::io;
use std::path::PathBuf;

use credblob_codec::{CodecError, CredentialRecord};
use log::{info, warn};
use thiserror::Error;

use super::blob::{BlobError, BlobStore};
use crate::clock::now_secs;
use crate::coord::{FileMutex, LockError};
use crate::host::{HostBridge, HostEvent};
use crate::identity::{Credential, Identity, IdentityStore, StoreError};
use crate::quota::{ensure_fresh, RefreshError};
use crate::remote::{RemoteError, TokenExchange};

/// Errors from a switch attempt.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("host is not ready for a credential change")]
    HostBusy,
    #[error("unknown identity {0}")]
    UnknownIdentity(String),
    #[error("credential for {id} expired and could not be refreshed: {source}")]
    CredentialExpired { id: String, source: RemoteError },
    #[error("no credential blob to edit; bootstrap required (set blob.bootstrapPath)")]
    BlobMissing,
    #[error("failed to read bootstrap blob {}: {source}", .path.display())]
    Bootstrap { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored credential field is malformed: {0}")]
    Codec(#[from] CodecError),
}

impl From<RefreshError> for SwitchError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::RefreshFailed { id, source } | RefreshError::Fetch { id, source } => {
                SwitchError::CredentialExpired { id, source }
            }
            RefreshError::Store(e) => SwitchError::Store(e),
        }
    }
}

/// Rewrites the host's credential blob for a chosen identity.
pub struct SwitchExecutor<'a> {
    store: &'a IdentityStore,
    blobs: &'a dyn BlobStore,
    tokens: &'a dyn TokenExchange,
    host: &'a dyn HostBridge,
    mutex: &'a FileMutex,
    bootstrap: Option<PathBuf>,
}

impl<'a> SwitchExecutor<'a> {
    pub fn new(
        store: &'a IdentityStore,
        blobs: &'a dyn BlobStore,
        tokens: &'a dyn TokenExchange,
        host: &'a dyn HostBridge,
        mutex: &'a FileMutex,
    ) -> Self {
        Self {
            store,
            blobs,
            tokens,
            host,
            mutex,
            bootstrap: None,
        }
    }

    pub fn with_bootstrap(mut self, path: Option<PathBuf>) -> Self {
        self.bootstrap = path;
        self
    }

    /// Make `id` the host's active identity.
    ///
    /// Emits `SwitchCompleted` or `SwitchFailed` towards the host.
    pub fn switch_to(&self, id: &str) -> Result<Identity, SwitchError> {
        match self.perform(id) {
            Ok(identity) => {
                info!("active identity is now {} ({})", identity.label, identity.id);
                self.host.emit(HostEvent::SwitchCompleted {
                    identity_id: identity.id.clone(),
                });
                Ok(identity)
            }
            Err(err) => {
                warn!("switch to {id} failed: {err}");
                self.host.emit(HostEvent::SwitchFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn perform(&self, id: &str) -> Result<Identity, SwitchError> {
        if !self.host.can_mutate() {
            return Err(SwitchError::HostBusy);
        }
        let identity = self
            .store
            .get(id)?
            .ok_or_else(|| SwitchError::UnknownIdentity(id.to_string()))?;
        let identity = ensure_fresh(self.store, self.tokens, &identity, now_secs())?;
        let record = identity.credential.to_record();
        self.mutex.with_lock(|| -> Result<(), SwitchError> {
            let current = self.current_blob()?;
            self.blobs.write(&record.splice_into(&current))?;
            Ok(())
        })?;
        let identity = self
            .store
            .update(&identity.id, |stored| stored.last_used = now_secs())?;
        self.host.request_reload();
        Ok(identity)
    }

    fn current_blob(&self) -> Result<Vec<u8>, SwitchError> {
        if let Some(blob) = self.blobs.read()? {
            return Ok(blob);
        }
        match &self.bootstrap {
            Some(path) => fs::read(path).map_err(|source| SwitchError::Bootstrap {
                path: path.clone(),
                source,
            }),
            None => Err(SwitchError::BlobMissing),
        }
    }

    /// Credential currently written in the host blob.
    pub fn installed_credential(&self) -> Result<Option<CredentialRecord>, SwitchError> {
        match self.blobs.read()? {
            Some(blob) => Ok(CredentialRecord::extract(&blob)?),
            None => Ok(None),
        }
    }

    /// Add the identity the host is signed in as to the pool. Returns the
    /// existing entry when its refresh secret is already known, and `None`
    /// when the blob carries no refresh secret.
    pub fn import_installed(&self, label: &str) -> Result<Option<Identity>, SwitchError> {
        let Some(record) = self.installed_credential()? else {
            return Ok(None);
        };
        if record.refresh_secret.is_empty() {
            return Ok(None);
        }
        if let Some(known) = self.store.find_by_refresh_secret(&record.refresh_secret)? {
            info!("host identity is already pooled as {}", known.id);
            return Ok(Some(known));
        }
        let identity = self.store.import(Credential::from(&record), label)?;
        Ok(Some(identity))
    }

    /// Identity whose secrets are installed in the blob, else the most
    /// recently used one.
    pub fn active_identity(&self) -> Result<Option<Identity>, SwitchError> {
        let identities = self.store.list()?;
        let installed = match self.installed_credential() {
            Ok(record) => record,
            Err(err) => {
                warn!("cannot read installed credential: {err}");
                None
            }
        };
        if let Some(record) = installed {
            let matched = identities
                .iter()
                .find(|i| {
                    !record.refresh_secret.is_empty()
                        && i.credential.refresh_secret == record.refresh_secret
                })
                .or_else(|| {
                    identities.iter().find(|i| {
                        !record.access_secret.is_empty()
                            && i.credential.access_secret == record.access_secret
                    })
                });
            if let Some(identity) = matched {
                return Ok(Some(identity.clone()));
            }
        }
        Ok(identities.into_iter().max_by_key(|i| i.last_used))
    }
}
