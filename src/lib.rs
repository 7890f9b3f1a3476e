// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.1
// Date Modified: 2026-10-18
// Author: Lukas Bower

//! Quota-aware identity pool.
//!
//! Several host processes share one on-disk identity store. A lease elects
//! one of them leader; the leader watches per-identity quota and swaps the
//! credential in the host's opaque state blob when the active identity runs
//! low. The blob itself is edited through [`credblob_codec`].

/// Wall-clock helpers and the per-process coordination id.
pub mod clock;

/// TOML configuration with defaults for every option.
pub mod config;

/// Identity records and the durable identity store.
pub mod identity;

/// Shared state record, leader lease, file mutex and change watcher.
pub mod coord;

/// Quota normalisation and display smoothing.
pub mod quota;

/// Remote token and quota collaborators.
pub mod remote;

/// Host notification surface.
pub mod host;

/// Switch executor, blob store and decision loop.
pub mod switch;

/// Cooperative timer loop tying everything together.
pub mod daemon;

pub use credblob_codec as codec;
