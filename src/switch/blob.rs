// CLASSIFICATION: COMMUNITY
// Filename: blob.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Access to the host's key-value store holding the credential blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use log::{debug, warn};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::coord::state::write_atomic;

/// Key flagged after a credential write so the host skips its first-run flow.
pub const ONBOARDING_KEY: &str = "antigravityOnboarding";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store io: {0}")]
    Io(#[from] io::Error),
    #[error("blob store is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("host database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blob value under {key} is not valid base64: {source}")]
    Base64 {
        key: String,
        source: base64::DecodeError,
    },
}

/// One opaque value in a durable key-value store.
pub trait BlobStore {
    /// Current blob, `None` when the store holds no record.
    fn read(&self) -> Result<Option<Vec<u8>>, BlobError>;
    fn write(&self, blob: &[u8]) -> Result<(), BlobError>;
}

/// JSON object file mapping keys to base64 text. Stands in for the editor
/// database where no SQLite file is wanted.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
    key: String,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>, key: &str) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn load(&self) -> Result<Option<Map<String, Value>>, BlobError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self) -> Result<Option<Vec<u8>>, BlobError> {
        let Some(map) = self.load()? else {
            return Ok(None);
        };
        match map.get(&self.key) {
            Some(Value::String(text)) if !text.is_empty() => BASE64_STANDARD
                .decode(text.trim())
                .map(Some)
                .map_err(|source| BlobError::Base64 {
                    key: self.key.clone(),
                    source,
                }),
            Some(Value::String(_)) | None | Some(Value::Null) => Ok(None),
            Some(other) => {
                warn!("ignoring non-text value under {}: {other}", self.key);
                Ok(None)
            }
        }
    }

    fn write(&self, blob: &[u8]) -> Result<(), BlobError> {
        let mut map = self.load()?.unwrap_or_default();
        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
            debug!("backed up {}", self.path.display());
        }
        map.insert(self.key.clone(), Value::String(BASE64_STANDARD.encode(blob)));
        map.insert(ONBOARDING_KEY.into(), Value::String("true".into()));
        write_atomic(&self.path, &serde_json::to_vec_pretty(&map)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_and_missing_key_read_as_none() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("state.json"), "blob");
        assert!(store.read().unwrap().is_none());
        fs::write(store.path(), br#"{"other":"x"}"#).unwrap();
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn write_keeps_other_keys_and_backs_up() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("state.json"), "blob");
        fs::write(store.path(), br#"{"other":"x","blob":"AQI="}"#).unwrap();
        assert_eq!(store.read().unwrap().unwrap(), vec![1, 2]);
        store.write(&[9, 9, 9]).unwrap();
        assert_eq!(store.read().unwrap().unwrap(), vec![9, 9, 9]);
        let map: Map<String, Value> =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(map["other"], "x");
        assert_eq!(map[ONBOARDING_KEY], "true");
        let backup = fs::read_to_string(store.backup_path()).unwrap();
        assert!(backup.contains("AQI="));
    }

    #[test]
    fn bad_base64_is_reported() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("state.json"), "blob");
        fs::write(store.path(), br#"{"blob":"@@@"}"#).unwrap();
        assert!(matches!(store.read(), Err(BlobError::Base64 { .. })));
    }
}
