// CLASSIFICATION: COMMUNITY
// Filename: remote.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Remote token and quota collaborators.
//!
//! The decision loop only sees the two traits. [`HttpRemote`] is the
//! production implementation over blocking `ureq` calls; tests supply fakes.

use std::io;

use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use ureq::{Agent, AgentBuilder};

use crate::config::RemoteConfig;
use crate::identity::Credential;
use crate::quota::RawQuotaResponse;

const LOAD_PROJECT_PATH: &str = "loadCodeAssist";
const FETCH_MODELS_PATH: &str = "fetchAvailableModels";
const USER_AGENT: &str = concat!("quotaswap/", env!("CARGO_PKG_VERSION"));

/// Errors from remote calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(#[from] io::Error),
    #[error("remote not configured: {0}")]
    NotConfigured(&'static str),
}

impl From<ureq::Error> for RemoteError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, resp) => RemoteError::Status {
                status,
                body: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => RemoteError::Transport(t.to_string()),
        }
    }
}

/// Fresh short-lived credential returned by a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    #[serde(rename = "access_token")]
    pub access_secret: String,
    #[serde(default)]
    pub expires_in: i64,
}

impl TokenGrant {
    /// `credential` with this grant's access secret and expiry applied.
    pub fn apply(&self, credential: &Credential, now_secs: i64) -> Credential {
        Credential {
            access_secret: self.access_secret.clone(),
            expires_at: now_secs + self.expires_in,
            ..credential.clone()
        }
    }
}

/// Exchanges a long-lived refresh secret for an access secret.
pub trait TokenExchange {
    fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, RemoteError>;
}

/// Outcome of a quota fetch.
#[derive(Debug, Clone)]
pub enum QuotaFetch {
    Quota(RawQuotaResponse),
    /// The service refuses this identity.
    Forbidden,
}

/// Fetches the raw quota document for one credential.
pub trait QuotaSource {
    fn fetch(&self, credential: &Credential) -> Result<QuotaFetch, RemoteError>;
}

/// Blocking HTTPS client for both collaborators.
pub struct HttpRemote {
    agent: Agent,
    cfg: RemoteConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectReply {
    cloudaicompanion_project: Option<String>,
}

impl HttpRemote {
    pub fn new(cfg: RemoteConfig) -> Self {
        let agent = AgentBuilder::new()
            .timeout(cfg.timeout())
            .user_agent(USER_AGENT)
            .build();
        Self { agent, cfg }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}:{method}", self.cfg.api_base.trim_end_matches('/'))
    }

    /// Project context for `credential`, or the configured default.
    fn project_for(&self, credential: &Credential) -> String {
        let reply = self
            .agent
            .post(&self.endpoint(LOAD_PROJECT_PATH))
            .set("Authorization", &bearer(credential))
            .send_json(json!({ "metadata": { "ideType": "ANTIGRAVITY" } }))
            .map_err(RemoteError::from)
            .and_then(|resp| resp.into_json::<ProjectReply>().map_err(RemoteError::from));
        match reply {
            Ok(ProjectReply {
                cloudaicompanion_project: Some(project),
            }) if !project.is_empty() => project,
            Ok(_) => self.cfg.default_project.clone(),
            Err(err) => {
                debug!("project lookup failed, using default: {err}");
                self.cfg.default_project.clone()
            }
        }
    }
}

fn bearer(credential: &Credential) -> String {
    format!("{} {}", credential.token_type, credential.access_secret)
}

impl TokenExchange for HttpRemote {
    fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, RemoteError> {
        if self.cfg.client_id.is_empty() {
            return Err(RemoteError::NotConfigured("remote.clientId"));
        }
        let resp = self.agent.post(&self.cfg.token_url).send_form(&[
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
            ("refresh_token", refresh_secret),
            ("grant_type", "refresh_token"),
        ])?;
        let grant: TokenGrant = resp.into_json()?;
        info!("access secret refreshed, valid for {}s", grant.expires_in);
        Ok(grant)
    }
}

impl QuotaSource for HttpRemote {
    fn fetch(&self, credential: &Credential) -> Result<QuotaFetch, RemoteError> {
        let project = self.project_for(credential);
        let result = self
            .agent
            .post(&self.endpoint(FETCH_MODELS_PATH))
            .set("Authorization", &bearer(credential))
            .send_json(json!({ "project": project }));
        match result {
            Ok(resp) => Ok(QuotaFetch::Quota(resp.into_json()?)),
            Err(ureq::Error::Status(403, _)) => Ok(QuotaFetch::Forbidden),
            Err(err) => Err(err.into()),
        }
    }
}
