// Configuration loading and parsing (splitit.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// splitit.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the splitit.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    api: ApiSection,
    group: GroupSection,
    #[serde(default)]
    watcher: WatcherSection,
    #[serde(default)]
    storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiSection {
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GroupSection {
    id: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct WatcherSection {
    interval_ms: u64,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorageSection {
    path: Option<String>,
}

/// The assembled client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API root, e.g. `http://localhost:5000/api`.
    pub base_url: String,
    /// The group whose balances are watched.
    pub group_id: i64,
    /// Poll cadence for the balance watcher.
    pub poll_interval_ms: u64,
    /// SQLite database path for local client state (the draft slot).
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from a specific `splitit.toml` path.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = Config {
        base_url: file.api.base_url,
        group_id: file.group.id,
        poll_interval_ms: file.watcher.interval_ms,
        db_path: file
            .storage
            .path
            .unwrap_or_else(|| default_db_path().to_string_lossy().into_owned()),
    };

    validate(&config)?;

    Ok(config)
}

/// Convenience wrapper: look for `splitit.toml` in the current working
/// directory first, then in the platform config directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let local = PathBuf::from("splitit.toml");
    if local.exists() {
        return load_config_from(&local);
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "splitit") {
        let candidate = dirs.config_dir().join("splitit.toml");
        if candidate.exists() {
            return load_config_from(&candidate);
        }
    }

    Err(ConfigError::FileNotFound { path: local })
}

/// Default location for the client-state database: the platform data dir,
/// falling back to the working directory.
fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "splitit")
        .map(|dirs| dirs.data_dir().join("splitit.db"))
        .unwrap_or_else(|| PathBuf::from("splitit.db"))
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: "must not be empty".into(),
        });
    }
    if config.group_id <= 0 {
        return Err(ConfigError::ValidationError {
            field: "group.id".into(),
            message: "must be a positive group id".into(),
        });
    }
    // Anything faster than this hammers the backend for no fresher data.
    if config.poll_interval_ms < 500 {
        return Err(ConfigError::ValidationError {
            field: "watcher.interval_ms".into(),
            message: "must be at least 500".into(),
        });
    }
    Ok(())
}
