// CLASSIFICATION: COMMUNITY
// Filename: clock.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use chrono::Utc;
use once_cell::sync::Lazy;

static PROCESS_ID: Lazy<String> =
    Lazy::new(|| format!("{}-{}", std::process::id(), now_millis()));

/// Seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Identifier of this process for leases and mutex markers.
///
/// Combines the OS pid with the start time so a recycled pid never inherits
/// a dead holder's lease.
pub fn process_id() -> &'static str {
    PROCESS_ID.as_str()
}
