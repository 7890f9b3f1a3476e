// CLASSIFICATION: COMMUNITY
// Filename: normalize.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::identity::{QuotaSnapshot, ResourceQuota};

/// Canonical resources in display order.
pub const CANONICAL_ORDER: [&str; 3] = ["claude", "gemini-pro", "gemini-flash"];

struct Rule {
    name: &'static str,
    all_of: &'static [&'static str],
    none_of: &'static [&'static str],
}

// Checked in order; the first rule that matches claims the model.
const RULES: &[Rule] = &[
    Rule {
        name: "claude",
        all_of: &["claude"],
        none_of: &["thinking"],
    },
    Rule {
        name: "gemini-pro",
        all_of: &["gemini", "3", "pro", "high"],
        none_of: &[],
    },
    Rule {
        name: "gemini-flash",
        all_of: &["gemini", "3", "flash"],
        none_of: &["thinking", "lite"],
    },
];

/// Response body of the model listing call.
///
/// `models` keeps the service's key order, which decides which model wins
/// when several map to one canonical name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuotaResponse {
    #[serde(default)]
    pub models: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawModel {
    pub quota_info: Option<ModelQuotaInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelQuotaInfo {
    pub remaining_fraction: Option<f64>,
    pub reset_time: Option<String>,
}

/// Canonical resource for a vendor model id, if any rule claims it.
pub fn canonical_name(model: &str) -> Option<&'static str> {
    let lower = model.to_lowercase();
    RULES
        .iter()
        .find(|rule| {
            rule.all_of.iter().all(|k| lower.contains(k))
                && !rule.none_of.iter().any(|k| lower.contains(k))
        })
        .map(|rule| rule.name)
}

fn percent(fraction: Option<f64>) -> u8 {
    let value = (fraction.unwrap_or(0.0) * 100.0).round();
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 100.0) as u8
    }
}

/// Map a raw response to a snapshot sorted by [`CANONICAL_ORDER`].
pub fn normalize(raw: &RawQuotaResponse, captured_at: i64) -> QuotaSnapshot {
    let mut resources: Vec<ResourceQuota> = Vec::new();
    for (model, body) in &raw.models {
        let info = match serde_json::from_value::<RawModel>(body.clone()) {
            Ok(RawModel {
                quota_info: Some(info),
            }) => info,
            Ok(_) => continue,
            Err(err) => {
                debug!("skipping model {model}: {err}");
                continue;
            }
        };
        let Some(name) = canonical_name(model) else {
            continue;
        };
        if resources.iter().any(|r| r.name == name) {
            continue;
        }
        resources.push(ResourceQuota::new(
            name,
            percent(info.remaining_fraction),
            info.reset_time.as_deref().unwrap_or(""),
        ));
    }
    resources.sort_by_key(|r| {
        CANONICAL_ORDER
            .iter()
            .position(|n| *n == r.name)
            .unwrap_or(CANONICAL_ORDER.len())
    });
    QuotaSnapshot::new(resources, captured_at)
}

/// Time left until `reset_at`, as `"<h>h <m>m"`.
///
/// Returns `"--"` for an empty or unparseable instant and `"reset"` once it
/// has passed.
pub fn format_reset(reset_at: &str, now: DateTime<Utc>) -> String {
    if reset_at.is_empty() {
        return "--".into();
    }
    let Ok(at) = DateTime::parse_from_rfc3339(reset_at) else {
        return "--".into();
    };
    let left = at.with_timezone(&Utc) - now;
    if left.num_milliseconds() < 0 {
        return "reset".into();
    }
    format!("{}h {}m", left.num_hours(), left.num_minutes() % 60)
}
