// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Shared fixture: a pool rooted in a temp dir with scripted collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use tempfile::{tempdir, TempDir};

use quotaswap::clock::now_secs;
use quotaswap::coord::{FileMutex, LeaderLease, StateFile};
use quotaswap::host::{HostBridge, HostEvent, SwitchProposal};
use quotaswap::identity::{Credential, Identity, IdentityStore};
use quotaswap::remote::{QuotaFetch, QuotaSource, RemoteError, TokenExchange, TokenGrant};
use quotaswap::switch::{
    BlobStore, DecisionContext, DecisionLoop, DecisionPolicy, FileBlobStore, SwitchExecutor,
};

/// Unrelated host fields kept around the credential field.
pub const BASE_BLOB: &[u8] = &[0x0a, 0x03, b'w', b'i', b'n', 0x10, 0x2a];

pub enum Scripted {
    Fraction(f64),
    /// Raw model name to remaining fraction.
    Models(Vec<(&'static str, f64)>),
    Forbidden,
    Fail,
}

/// Quota answers keyed by refresh secret.
#[derive(Default)]
pub struct FakeQuotas {
    answers: Mutex<HashMap<String, Scripted>>,
    pub calls: AtomicUsize,
}

impl FakeQuotas {
    pub fn set(&self, refresh_secret: &str, answer: Scripted) {
        self.answers
            .lock()
            .unwrap()
            .insert(refresh_secret.to_string(), answer);
    }
}

impl QuotaSource for FakeQuotas {
    fn fetch(&self, credential: &Credential) -> Result<QuotaFetch, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.lock().unwrap().get(&credential.refresh_secret) {
            Some(Scripted::Fraction(f)) => Ok(QuotaFetch::Quota(
                serde_json::from_value(json!({
                    "models": { "claude-x": { "quotaInfo": { "remainingFraction": f } } }
                }))
                .unwrap(),
            )),
            Some(Scripted::Models(models)) => {
                let models: serde_json::Map<String, serde_json::Value> = models
                    .iter()
                    .map(|(name, f)| {
                        (name.to_string(), json!({ "quotaInfo": { "remainingFraction": f } }))
                    })
                    .collect();
                Ok(QuotaFetch::Quota(
                    serde_json::from_value(json!({ "models": models })).unwrap(),
                ))
            }
            Some(Scripted::Forbidden) => Ok(QuotaFetch::Forbidden),
            Some(Scripted::Fail) | None => Err(RemoteError::Transport("scripted failure".into())),
        }
    }
}

pub struct FakeTokens;

impl TokenExchange for FakeTokens {
    fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, RemoteError> {
        Ok(TokenGrant {
            access_secret: format!("fresh-{refresh_secret}"),
            expires_in: 3600,
        })
    }
}

#[derive(Default)]
pub struct RecordingHost {
    pub decline: AtomicBool,
    /// Resources whose proposals are declined even when `decline` is off.
    pub decline_resources: Mutex<HashSet<String>>,
    pub events: Mutex<Vec<HostEvent>>,
    pub proposals: Mutex<Vec<SwitchProposal>>,
    pub reloads: AtomicUsize,
}

impl RecordingHost {
    pub fn completed(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                HostEvent::SwitchCompleted { identity_id } => Some(identity_id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl HostBridge for RecordingHost {
    fn emit(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn confirm_switch(&self, proposal: &SwitchProposal) -> bool {
        self.proposals.lock().unwrap().push(proposal.clone());
        let refused = self
            .decline_resources
            .lock()
            .unwrap()
            .contains(&proposal.resource);
        !(refused || self.decline.load(Ordering::SeqCst))
    }

    fn request_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn can_mutate(&self) -> bool {
        true
    }
}

pub struct Pool {
    pub dir: TempDir,
    pub mutex: FileMutex,
    pub store: IdentityStore,
    pub state: StateFile,
    pub lease: LeaderLease,
    pub blobs: FileBlobStore,
    pub tokens: FakeTokens,
    pub quotas: FakeQuotas,
    pub host: RecordingHost,
}

impl Pool {
    pub fn new(owner: &str) -> Self {
        let dir = tempdir().unwrap();
        let mutex = FileMutex::new(dir.path().join(".lock"), owner);
        let store = IdentityStore::new(dir.path().join("identities.json"), mutex.clone())
            .with_cache_ttl(Duration::ZERO);
        let state = StateFile::new(dir.path().join(".state"));
        let lease = LeaderLease::new(owner, state.clone(), mutex.clone());
        let blobs = FileBlobStore::new(dir.path().join("host.json"), "blob");
        Self {
            dir,
            mutex,
            store,
            state,
            lease,
            blobs,
            tokens: FakeTokens,
            quotas: FakeQuotas::default(),
            host: RecordingHost::default(),
        }
    }

    /// Add an identity whose quota fetch reports `claude` at `fraction`.
    pub fn add(&self, id: &str, fraction: f64) {
        let refresh = format!("1//{id}");
        let credential = Credential::new(&format!("acc-{id}"), &refresh, now_secs() + 3600);
        self.store
            .upsert(Identity::new(id, &format!("{id}@example"), credential, 0))
            .unwrap();
        self.quotas.set(&refresh, Scripted::Fraction(fraction));
    }

    pub fn script(&self, id: &str, answer: Scripted) {
        self.quotas.set(&format!("1//{id}"), answer);
    }

    /// Write `id`'s credential into the host blob.
    pub fn install(&self, id: &str) {
        let identity = self.store.get(id).unwrap().unwrap();
        let blob = identity.credential.to_record().splice_into(BASE_BLOB);
        self.blobs.write(&blob).unwrap();
    }

    pub fn executor(&self) -> SwitchExecutor<'_> {
        SwitchExecutor::new(&self.store, &self.blobs, &self.tokens, &self.host, &self.mutex)
    }

    pub fn decision(&self, policy: DecisionPolicy) -> DecisionLoop<'_> {
        let ctx = DecisionContext {
            store: &self.store,
            tokens: &self.tokens,
            quotas: &self.quotas,
            host: &self.host,
            lease: &self.lease,
            state: &self.state,
            mutex: &self.mutex,
        };
        DecisionLoop::new(ctx, self.executor(), policy)
    }

    pub fn installed_access_secret(&self) -> String {
        let blob = self.blobs.read().unwrap().unwrap();
        quotaswap::codec::CredentialRecord::extract(&blob)
            .unwrap()
            .unwrap()
            .access_secret
    }
}

/// Automatic policy with `claude` at `threshold`, no prompts.
pub fn claude_policy(threshold: u8) -> DecisionPolicy {
    let mut policy = DecisionPolicy::default();
    policy.interactive = false;
    policy.thresholds.insert("claude".into(), threshold);
    policy
}
