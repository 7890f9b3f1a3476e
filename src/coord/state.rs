// CLASSIFICATION: COMMUNITY
// Filename: state.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Small JSON record shared by every cooperating process.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

/// Leader lease and last-switch bookkeeping.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_heartbeat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_switch_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_switch_target: Option<String>,
}

/// Last successful switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRecord {
    pub at_millis: i64,
    pub target_id: String,
}

impl SharedState {
    pub fn switch_record(&self) -> Option<SwitchRecord> {
        Some(SwitchRecord {
            at_millis: self.last_switch_at?,
            target_id: self.last_switch_target.clone().unwrap_or_default(),
        })
    }

    pub fn clear_leader(&mut self) {
        self.leader_id = None;
        self.leader_heartbeat = None;
        self.leader_since = None;
    }
}

/// Location of the shared state record.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. Missing or unreadable state reads as empty.
    pub fn read(&self) -> SharedState {
        match fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|err| {
                warn!("ignoring corrupt state {}: {err}", self.path.display());
                SharedState::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => SharedState::default(),
            Err(err) => {
                warn!("failed to read state {}: {err}", self.path.display());
                SharedState::default()
            }
        }
    }

    /// Replace the record atomically.
    pub fn write(&self, state: &SharedState) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &data)
    }

    /// Read, mutate and write back. Callers serialise through the file mutex.
    pub fn update<F>(&self, f: F) -> io::Result<SharedState>
    where
        F: FnOnce(&mut SharedState),
    {
        let mut state = self.read();
        f(&mut state);
        self.write(&state)?;
        Ok(state)
    }
}

/// Write via a sibling temp file and rename so readers never see a torn record.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_and_corrupt_state_read_empty() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join(".state"));
        assert_eq!(file.read(), SharedState::default());
        fs::write(file.path(), b"{not json").unwrap();
        assert_eq!(file.read(), SharedState::default());
    }

    #[test]
    fn update_round_trips_switch_record() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join(".state"));
        file.update(|s| {
            s.last_switch_at = Some(42);
            s.last_switch_target = Some("b".into());
        })
        .unwrap();
        let record = file.read().switch_record().unwrap();
        assert_eq!(record.at_millis, 42);
        assert_eq!(record.target_id, "b");
    }
}
