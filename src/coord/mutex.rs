// CLASSIFICATION: COMMUNITY
// Filename: mutex.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Advisory cross-process mutex backed by an exclusively created marker file.
//!
//! The marker holds a [`MutexToken`]. A marker older than the staleness window
//! is assumed to belong to a dead process and is reclaimed by whoever finds it.
//! Reclaiming renames the marker to a private tombstone first and only deletes
//! it if the tombstone still holds the token that was judged stale.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::now_millis;

/// Markers older than this are reclaimed.
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(5);
/// Default bound on [`FileMutex::acquire`].
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(5000);
/// Pause between contended attempts.
pub const LOCK_RETRY: Duration = Duration::from_millis(50);

static TOMBSTONES: AtomicU64 = AtomicU64::new(0);

/// Errors returned by [`FileMutex`].
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited_ms}ms waiting for {}", .path.display())]
    Timeout { path: PathBuf, waited_ms: u128 },
    #[error("lock marker io: {0}")]
    Io(#[from] io::Error),
}

/// Contents of the marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutexToken {
    pub owner_id: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// Exclusive-create file lock shared by cooperating processes.
#[derive(Debug, Clone)]
pub struct FileMutex {
    path: PathBuf,
    owner: String,
    stale_after: Duration,
    timeout: Duration,
    retry_every: Duration,
}

impl FileMutex {
    pub fn new(path: impl Into<PathBuf>, owner: &str) -> Self {
        Self {
            path: path.into(),
            owner: owner.into(),
            stale_after: LOCK_STALE_AFTER,
            timeout: LOCK_TIMEOUT,
            retry_every: LOCK_RETRY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Block until the marker is created or `timeout` elapses.
    pub fn acquire(&self, timeout: Duration) -> Result<MutexGuard<'_>, LockError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let started = Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(file) => {
                    self.stamp(file)?;
                    return Ok(MutexGuard {
                        mutex: self,
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if self.reclaim_if_stale()? && started.elapsed() < timeout {
                        continue;
                    }
                }
                Err(err) => return Err(err.into()),
            }
            if started.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            thread::sleep(self.retry_every);
        }
    }

    /// Delete the marker if it still names this owner.
    ///
    /// Returns `false` when the marker is gone or was reclaimed by someone else.
    pub fn release(&self) -> Result<bool, LockError> {
        match self.read_token() {
            Ok(Some(token)) if token.owner_id == self.owner => {
                match fs::remove_file(&self.path) {
                    Ok(()) => Ok(true),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
            Ok(_) => Ok(false),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Run `f` while holding the mutex. The marker is released on every exit
    /// path, including panics.
    pub fn with_lock<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<LockError>,
    {
        let guard = self.acquire(self.timeout)?;
        let result = f();
        if let Err(err) = guard.release() {
            warn!("failed to release {}: {err}", self.path.display());
        }
        result
    }

    fn stamp(&self, mut file: fs::File) -> Result<(), LockError> {
        let token = MutexToken {
            owner_id: self.owner.clone(),
            created_at: now_millis(),
        };
        let written = serde_json::to_vec(&token)
            .map_err(io::Error::from)
            .and_then(|bytes| file.write_all(&bytes));
        if let Err(err) = written {
            let _ = fs::remove_file(&self.path);
            return Err(err.into());
        }
        Ok(())
    }

    fn read_token(&self) -> io::Result<Option<MutexToken>> {
        read_token_at(&self.path)
    }

    /// The marker's token and age. Unstamped markers age by mtime.
    fn inspect_marker(&self) -> io::Result<(Option<MutexToken>, Duration)> {
        if let Some(token) = self.read_token()? {
            let age_ms = now_millis().saturating_sub(token.created_at).max(0);
            return Ok((Some(token), Duration::from_millis(age_ms as u64)));
        }
        let modified = fs::metadata(&self.path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok((None, age))
    }

    fn reclaim_if_stale(&self) -> Result<bool, LockError> {
        let (seen, age) = match self.inspect_marker() {
            Ok(found) => found,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        if age <= self.stale_after {
            return Ok(false);
        }
        warn!(
            "reclaiming stale lock {} ({}ms old)",
            self.path.display(),
            age.as_millis()
        );
        self.reclaim(seen.as_ref())
    }

    /// Move the marker aside and delete it only if it is still the one judged
    /// stale. A marker that changed in between is put back and the lock
    /// counts as contended.
    fn reclaim(&self, seen: Option<&MutexToken>) -> Result<bool, LockError> {
        let tomb = self.tombstone_path();
        match fs::rename(&self.path, &tomb) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        }
        let moved = read_token_at(&tomb)?;
        if moved.as_ref() == seen {
            fs::remove_file(&tomb)?;
            return Ok(true);
        }
        debug!(
            "{} changed hands during reclaim, restoring",
            self.path.display()
        );
        match fs::hard_link(&tomb, &self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "{} was recreated before the live marker could be restored",
                    self.path.display()
                );
            }
            Err(err) => {
                let _ = fs::remove_file(&tomb);
                return Err(err.into());
            }
        }
        fs::remove_file(&tomb)?;
        Ok(false)
    }

    fn tombstone_path(&self) -> PathBuf {
        let n = TOMBSTONES.fetch_add(1, Ordering::Relaxed);
        let mut name = self
            .path
            .file_name()
            .map(|file| file.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.{n}.stale", std::process::id()));
        self.path.with_file_name(name)
    }
}

fn read_token_at(path: &Path) -> io::Result<Option<MutexToken>> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data).ok())
}

/// Scoped hold on a [`FileMutex`]; dropping it releases the marker.
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a FileMutex,
    released: bool,
}

impl MutexGuard<'_> {
    /// Release explicitly, surfacing marker errors.
    pub fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        self.mutex.release()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.mutex.release() {
            warn!("failed to release {}: {err}", self.mutex.path.display());
        } else {
            debug!("released {}", self.mutex.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_owner_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let a = FileMutex::new(&path, "a");
        let b = FileMutex::new(&path, "b");
        let _held = a.acquire(Duration::from_millis(100)).unwrap();
        let err = b.acquire(Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[test]
    fn release_ignores_foreign_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let a = FileMutex::new(&path, "a");
        let b = FileMutex::new(&path, "b");
        let guard = a.acquire(Duration::from_millis(100)).unwrap();
        assert!(!b.release().unwrap());
        assert!(path.exists());
        assert!(guard.release().unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn stale_marker_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let token = MutexToken {
            owner_id: "dead".into(),
            created_at: now_millis() - 60_000,
        };
        fs::write(&path, serde_json::to_vec(&token).unwrap()).unwrap();
        let live = FileMutex::new(&path, "live");
        let guard = live.acquire(Duration::from_millis(200)).unwrap();
        assert_eq!(live.read_token().unwrap().unwrap().owner_id, "live");
        drop(guard);
        assert!(!path.exists());
    }

    fn stale_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".stale")
            })
            .count()
    }

    #[test]
    fn reclaim_leaves_no_tombstone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let dead = MutexToken {
            owner_id: "dead".into(),
            created_at: now_millis() - 60_000,
        };
        fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();
        let live = FileMutex::new(&path, "live");
        assert!(live.reclaim_if_stale().unwrap());
        assert!(!path.exists());
        assert_eq!(stale_files(dir.path()), 0);
    }

    #[test]
    fn reclaim_restores_a_marker_that_changed_hands() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let dead = MutexToken {
            owner_id: "dead".into(),
            created_at: now_millis() - 60_000,
        };
        // `a` took the lock after `b` judged the dead marker stale.
        let a = FileMutex::new(&path, "a");
        let held = a.acquire(Duration::from_millis(100)).unwrap();
        let fresh = a.read_token().unwrap().unwrap();

        let b = FileMutex::new(&path, "b");
        assert!(!b.reclaim(Some(&dead)).unwrap());
        assert_eq!(b.read_token().unwrap().unwrap(), fresh);
        assert_eq!(stale_files(dir.path()), 0);
        assert!(held.release().unwrap());
    }

    #[test]
    fn with_lock_releases_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let mutex = FileMutex::new(&path, "a");
        let result: Result<(), LockError> = mutex.with_lock(|| {
            Err(LockError::Io(io::Error::new(io::ErrorKind::Other, "boom")))
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
