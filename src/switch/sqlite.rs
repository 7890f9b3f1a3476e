// CLASSIFICATION: COMMUNITY
// Filename: sqlite.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! The editor's `state.vscdb`: a SQLite database with one `ItemTable` of
//! key/value rows. The credential blob lives under one key as base64 text.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use log::{debug, info};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::blob::{BlobError, BlobStore, ONBOARDING_KEY};

/// How long to wait on the editor's own write locks.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteBlobStore {
    path: PathBuf,
    key: String,
}

impl SqliteBlobStore {
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

    /// Open without creating; the editor owns the database's lifecycle.
    fn open(&self) -> Result<Connection, BlobError> {
        if !self.path.exists() {
            return Err(BlobError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "{} does not exist, start the editor once first",
                    self.path.display()
                ),
            )));
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn has_item_table(conn: &Connection) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'ItemTable'",
            [],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
    }

    fn get_item(conn: &Connection, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
        conn.query_row(
            "SELECT value FROM ItemTable WHERE key = ?1",
            params![key],
            |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes.to_vec()),
                    _ => None,
                })
            },
        )
        .optional()
        .map(Option::flatten)
    }

    /// Snapshot the database next to itself before a write.
    fn backup(&self, conn: &Connection) -> Result<(), BlobError> {
        let backup = self.backup_path();
        match fs::remove_file(&backup) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        conn.execute(
            "VACUUM INTO ?1",
            params![backup.to_string_lossy().into_owned()],
        )?;
        debug!("backed up {} to {}", self.path.display(), backup.display());
        Ok(())
    }
}

impl BlobStore for SqliteBlobStore {
    fn read(&self) -> Result<Option<Vec<u8>>, BlobError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = self.open()?;
        if !Self::has_item_table(&conn)? {
            return Ok(None);
        }
        let Some(raw) = Self::get_item(&conn, &self.key)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        BASE64_STANDARD
            .decode(text)
            .map(Some)
            .map_err(|source| BlobError::Base64 {
                key: self.key.clone(),
                source,
            })
    }

    fn write(&self, blob: &[u8]) -> Result<(), BlobError> {
        let mut conn = self.open()?;
        self.backup(&conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable \
             (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)",
            [],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
            params![self.key, BASE64_STANDARD.encode(blob)],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, 'true')",
            params![ONBOARDING_KEY],
        )?;
        tx.commit()?;
        info!("wrote {} bytes under {} in {}", blob.len(), self.key, self.path.display());
        Ok(())
    }
}
