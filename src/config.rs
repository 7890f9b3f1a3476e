// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Runtime configuration loaded from TOML.
//!
//! Every key is optional. Unknown keys are ignored so older binaries keep
//! working against newer files.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

/// Overrides the configuration file location.
pub const CONFIG_ENV: &str = "QUOTASWAP_CONFIG";
/// Overrides the data directory.
pub const HOME_ENV: &str = "QUOTASWAP_HOME";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no data directory: set QUOTASWAP_HOME or HOME")]
    NoHome,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Active identity quota refresh cadence.
    pub refresh_interval_seconds: u64,
    pub auto_switch: AutoSwitchConfig,
    pub tuning: TuningConfig,
    pub remote: RemoteConfig,
    pub blob: BlobConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 10,
            auto_switch: AutoSwitchConfig::default(),
            tuning: TuningConfig::default(),
            remote: RemoteConfig::default(),
            blob: BlobConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoSwitchConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    /// Ask the host before switching.
    pub interactive: bool,
    pub notify_on_switch: bool,
    /// Per-resource percentage floors. Zero disables a resource.
    pub thresholds: BTreeMap<String, u8>,
}

impl Default for AutoSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 30,
            interactive: true,
            notify_on_switch: true,
            thresholds: BTreeMap::new(),
        }
    }
}

impl AutoSwitchConfig {
    /// Thresholds that are switched on, in resource-name order.
    pub fn active_thresholds(&self) -> impl Iterator<Item = (&str, u8)> {
        self.thresholds
            .iter()
            .filter(|(_, t)| **t > 0)
            .map(|(name, t)| (name.as_str(), (*t).min(100)))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TuningConfig {
    pub hysteresis_band: u8,
    pub random_tie_break: bool,
    pub spike_drop_points: u8,
    pub min_switch_interval_seconds: u64,
    pub lease_ttl_seconds: u64,
    pub heartbeat_seconds: u64,
    pub lock_stale_seconds: u64,
    pub lock_timeout_ms: u64,
    pub cache_ttl_ms: u64,
    pub watch_interval_seconds: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            hysteresis_band: 1,
            random_tie_break: true,
            spike_drop_points: 5,
            min_switch_interval_seconds: 300,
            lease_ttl_seconds: 15,
            heartbeat_seconds: 5,
            lock_stale_seconds: 5,
            lock_timeout_ms: 5000,
            cache_ttl_ms: 2000,
            watch_interval_seconds: 2,
        }
    }
}

impl TuningConfig {
    pub fn min_switch_interval(&self) -> Duration {
        Duration::from_secs(self.min_switch_interval_seconds)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds.max(1))
    }

    pub fn lock_stale(&self) -> Duration {
        Duration::from_secs(self.lock_stale_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteConfig {
    pub token_url: String,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    /// Project used when the service does not name one.
    pub default_project: String,
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".into(),
            api_base: "https://cloudcode-pa.googleapis.com/v1internal".into(),
            client_id: String::new(),
            client_secret: String::new(),
            default_project: String::new(),
            timeout_seconds: 15,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

/// Storage format of the host's key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// The editor's `state.vscdb` SQLite database.
    Sqlite,
    /// A JSON object file of base64 values.
    Json,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlobConfig {
    /// Inferred from `path` when unset: `.json` files are JSON, anything
    /// else is SQLite.
    pub kind: Option<BlobKind>,
    /// Host store. Defaults to the editor's `state.vscdb` for SQLite and
    /// `<data_dir>/host-state.json` for JSON.
    pub path: Option<PathBuf>,
    pub key: Option<String>,
    /// Seed blob used when the store holds no record yet.
    pub bootstrap_path: Option<PathBuf>,
}

/// Key under which the host keeps its state blob.
pub const DEFAULT_BLOB_KEY: &str = "jetskiStateSync.agentManagerInitState";

impl BlobConfig {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_BLOB_KEY)
    }

    pub fn kind(&self) -> BlobKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match self.path.as_deref().and_then(Path::extension) {
            Some(ext) if ext == "json" => BlobKind::Json,
            _ => BlobKind::Sqlite,
        }
    }
}

/// The editor's global state database for the current platform.
pub fn default_state_db() -> Option<PathBuf> {
    const TAIL: &str = "Antigravity/User/globalStorage/state.vscdb";
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from);
    if cfg!(target_os = "macos") {
        home.map(|h| h.join("Library/Application Support").join(TAIL))
    } else if cfg!(windows) {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .or_else(|| home.map(|h| h.join("AppData/Roaming")))
            .map(|dir| dir.join(TAIL))
    } else {
        home.map(|h| h.join(".config").join(TAIL))
    }
}

/// Files kept under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub identities: PathBuf,
    pub lock: PathBuf,
    pub state: PathBuf,
    pub host_blob: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            identities: root.join("identities.json"),
            lock: root.join(".lock"),
            state: root.join(".state"),
            host_blob: root.join("host-state.json"),
            root,
        }
    }

    /// `$QUOTASWAP_HOME`, else `$HOME/.quotaswap`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            return Ok(Self::new(home));
        }
        std::env::var("HOME")
            .map(|home| Self::new(Path::new(&home).join(".quotaswap")))
            .map_err(|_| ConfigError::NoHome)
    }

    pub fn config_file(&self) -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.root.join("config.toml"))
    }

    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("{} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Host store location for the configured kind.
    pub fn blob_path(&self, paths: &DataPaths) -> PathBuf {
        if let Some(path) = &self.blob.path {
            return path.clone();
        }
        match self.blob.kind() {
            BlobKind::Json => paths.host_blob.clone(),
            BlobKind::Sqlite => {
                default_state_db().unwrap_or_else(|| paths.root.join("state.vscdb"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.refresh_interval_seconds, 10);
        assert_eq!(cfg.auto_switch.check_interval_seconds, 30);
        assert!(cfg.auto_switch.interactive);
        assert_eq!(cfg.tuning.min_switch_interval(), Duration::from_secs(300));
    }

    #[test]
    fn camel_case_keys_and_thresholds() {
        let cfg = Config::from_toml(
            r#"
refreshIntervalSeconds = 20

[autoSwitch]
interactive = false
checkIntervalSeconds = 45

[autoSwitch.thresholds]
claude = 10
gemini-pro = 0
gemini-flash = 150

[tuning]
hysteresisBand = 2
randomTieBreak = false
"#,
        )
        .unwrap();
        assert_eq!(cfg.refresh_interval_seconds, 20);
        assert!(!cfg.auto_switch.interactive);
        assert!(cfg.auto_switch.enabled);
        assert_eq!(cfg.auto_switch.check_interval_seconds, 45);
        let active: Vec<_> = cfg.auto_switch.active_thresholds().collect();
        assert_eq!(active, vec![("claude", 10), ("gemini-flash", 100)]);
        assert_eq!(cfg.tuning.hysteresis_band, 2);
        assert!(!cfg.tuning.random_tie_break);
        assert_eq!(cfg.tuning.spike_drop_points, 5);
    }

    #[test]
    fn bad_type_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "refreshIntervalSeconds = \"soon\"").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.blob.key(), DEFAULT_BLOB_KEY);
    }

    #[test]
    fn blob_kind_follows_path_unless_set() {
        let paths = DataPaths::new("/data");
        let cfg = Config::from_toml("[blob]\npath = \"/tmp/host.json\"").unwrap();
        assert_eq!(cfg.blob.kind(), BlobKind::Json);
        assert_eq!(cfg.blob_path(&paths), PathBuf::from("/tmp/host.json"));

        let cfg = Config::from_toml("[blob]\nkind = \"json\"").unwrap();
        assert_eq!(cfg.blob_path(&paths), paths.host_blob);

        let cfg = Config::from_toml("[blob]\npath = \"/tmp/state.vscdb\"").unwrap();
        assert_eq!(cfg.blob.kind(), BlobKind::Sqlite);
        assert_eq!(Config::default().blob.kind(), BlobKind::Sqlite);
        assert!(Config::default()
            .blob_path(&paths)
            .ends_with("globalStorage/state.vscdb")
            || Config::default().blob_path(&paths) == paths.root.join("state.vscdb"));
    }
}
