// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Switching the host between identities.

pub mod blob;
pub mod decision;
pub mod executor;
pub mod sqlite;

pub use blob::{BlobError, BlobStore, FileBlobStore, ONBOARDING_KEY};
pub use decision::{
    best_candidates, record_switch, select_candidate, DecisionContext, DecisionLoop,
    DecisionPolicy, RejectionMemo, TickOutcome,
};
pub use executor::{SwitchError, SwitchExecutor};
pub use sqlite::SqliteBlobStore;
