use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::manager::ManagerConfig;
use crate::retention::{ListOrder, RetentionPolicy};
use crate::storage::GITHUB_API_BASE;
use crate::{APP_NAME, Error, FAMILY_MARKER, Result};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Scoop ships a batch shim on Windows, and the export tool is spawned
/// without a shell.
#[cfg(windows)]
pub const DEFAULT_SNAPSHOT_PROGRAM: &str = "scoop.cmd";
#[cfg(not(windows))]
pub const DEFAULT_SNAPSHOT_PROGRAM: &str = "scoop";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub snapshot: SnapshotSettings,
    #[serde(default)]
    pub retention: Retention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub provider: String,
    pub api_base: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSettings {
    pub family_marker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retention {
    pub keep_last: u32,
    #[serde(default)]
    pub order: ListOrder,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: "gist".to_string(),
            api_base: GITHUB_API_BASE.to_string(),
            user_agent: APP_NAME.to_string(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            family_marker: FAMILY_MARKER.to_string(),
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_SNAPSHOT_PROGRAM.to_string(),
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            keep_last: 1,
            order: ListOrder::NewestFirst,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            store: StoreSettings::default(),
            backup: BackupSettings::default(),
            snapshot: SnapshotSettings::default(),
            retention: Retention::default(),
        }
    }
}

impl Settings {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: self.retention.keep_last as usize,
            order: self.retention.order,
        }
    }

    pub fn manager_config(&self, cache_dir: impl Into<PathBuf>) -> ManagerConfig {
        ManagerConfig {
            family_marker: self.backup.family_marker.clone(),
            cache_dir: cache_dir.into(),
            retention: self.retention_policy(),
        }
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path)
        .map_err(|e| Error::config(format!("config read failed: {e}")))?;

    let settings =
        parse_settings(&text).map_err(|e| Error::config(format!("config invalid: {e}")))?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn parse_settings(text: &str) -> std::result::Result<Settings, toml::de::Error> {
    let raw: toml::Value = toml::from_str(text)?;
    let version = raw
        .get("version")
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok());

    match version {
        Some(SETTINGS_SCHEMA_VERSION) => toml::from_str::<Settings>(text),
        Some(other) => Err(toml::de::Error::custom(format!(
            "unsupported settings schema version: {other} (expected {SETTINGS_SCHEMA_VERSION})"
        ))),
        None => Err(toml::de::Error::custom("missing settings version")),
    }
}

pub fn to_toml(settings: &Settings) -> Result<String> {
    validate_settings(settings)?;
    toml::to_string(settings).map_err(|e| Error::config(format!("config encode failed: {e}")))
}

pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<()> {
    let text = to_toml(settings)?;

    let path = config_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("config dir create failed: {e}")))?;
    }

    atomic_write(&path, text.as_bytes())
        .map_err(|e| Error::config(format!("config write failed: {e}")))?;
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.version != SETTINGS_SCHEMA_VERSION {
        return Err(Error::config(format!(
            "settings.version must be {SETTINGS_SCHEMA_VERSION} (got {})",
            settings.version
        )));
    }

    if settings.store.provider.trim() != "gist" {
        return Err(Error::config("store.provider must be \"gist\""));
    }
    let api_base = settings.store.api_base.trim();
    if !(api_base.starts_with("https://") || api_base.starts_with("http://")) {
        return Err(Error::config("store.api_base must be an http(s) URL"));
    }
    if settings.store.user_agent.trim().is_empty() {
        return Err(Error::config("store.user_agent must not be empty"));
    }

    if settings.backup.family_marker.trim().is_empty() {
        return Err(Error::config("backup.family_marker must not be empty"));
    }

    if settings.snapshot.program.trim().is_empty() {
        return Err(Error::config("snapshot.program must not be empty"));
    }

    if settings.retention.keep_last < 1 {
        return Err(Error::config("retention.keep_last must be >= 1"));
    }

    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
