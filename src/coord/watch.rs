// CLASSIFICATION: COMMUNITY
// Filename: watch.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Polls a file's modification time to notice writes by other processes.
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    path: PathBuf,
    last_seen: Option<SystemTime>,
}

impl ChangeWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_seen = modified(&path);
        Self { path, last_seen }
    }

    /// True when the file's mtime moved past the last observed value.
    pub fn poll(&mut self) -> bool {
        let current = modified(&self.path);
        let changed = match (current, self.last_seen) {
            (Some(now), Some(before)) => now > before,
            (Some(_), None) => true,
            _ => false,
        };
        if changed {
            self.last_seen = current;
        }
        changed
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
