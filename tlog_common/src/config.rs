//! Configuration loading for connections to the source and target databases
//! and for the restore/backup drivers built on top of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Log level for configuration, serialized the way the rest of the
/// ecosystem expects (`"info"`, `"debug"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Error type for configuration loading operations, raised at construction
/// time per §7's "Configuration" error kind.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read configuration file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("failed to parse configuration: {reason}")]
    ParseError { reason: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("unknown database name: {name}")]
    UnknownDatabase { name: String },
}

/// Connection parameters for one database endpoint (source or target).
/// Deliberately opaque beyond a URI and a credential-discovery hint: the
/// concrete client is an external collaborator (§1 scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub uri: String,
    pub db_name: String,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

/// Where segments live: a directory for the filesystem backend, or an
/// object-store bucket/prefix pair. The continuous driver's passthrough
/// mode needs neither (it reads straight from `source`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentStoreConfig {
    Filesystem { directory: PathBuf },
    ObjectStore { bucket: String, prefix: String },
    Memory,
}

/// Full configuration for a continuous-restore or bulk-backup run, loaded
/// from a TOML file with `clap`-supplied overrides applied on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    pub store: SegmentStoreConfig,

    #[serde(default = "defaults::segment_size")]
    pub segment_size: u64,
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "defaults::prefetch_buffer")]
    pub prefetch_buffer: usize,
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub verify: bool,
    #[serde(default = "defaults::log_level")]
    pub log_level: LogLevel,
}

mod defaults {
    use super::LogLevel;

    pub fn segment_size() -> u64 {
        1000
    }
    pub fn poll_interval_ms() -> u64 {
        5000
    }
    pub fn prefetch_buffer() -> usize {
        5
    }
    pub fn max_backoff_ms() -> u64 {
        300_000
    }
    pub fn log_level() -> LogLevel {
        LogLevel::Info
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            source: ConnectionConfig {
                uri: String::new(),
                db_name: String::new(),
                credentials_path: None,
            },
            target: ConnectionConfig {
                uri: String::new(),
                db_name: String::new(),
                credentials_path: None,
            },
            store: SegmentStoreConfig::Memory,
            segment_size: defaults::segment_size(),
            poll_interval_ms: defaults::poll_interval_ms(),
            prefetch_buffer: defaults::prefetch_buffer(),
            max_backoff_ms: defaults::max_backoff_ms(),
            blacklist: Vec::new(),
            verify: true,
            log_level: defaults::log_level(),
        }
    }
}

/// Load a [`RestoreConfig`] from a TOML file, raising [`ConfigError`] at
/// construction time the way `evo_common::config::load_config_dir` does.
pub fn load_config(path: &Path) -> Result<RestoreConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported_at_load_time() {
        let err = load_config(Path::new("/nonexistent/path/tlog.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn defaults_fill_in_omitted_fields() {
        let toml_src = r#"
            [source]
            uri = "datomic:dev://localhost:4334/source"
            db_name = "source-db"

            [target]
            uri = "datomic:dev://localhost:4334/target"
            db_name = "target-db"

            [store]
            kind = "memory"
        "#;
        let cfg: RestoreConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.segment_size, 1000);
        assert_eq!(cfg.poll_interval_ms, 5000);
        assert_eq!(cfg.prefetch_buffer, 5);
        assert_eq!(cfg.max_backoff_ms, 300_000);
        assert!(!cfg.verify);
    }

    #[test]
    fn round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlog.toml");
        std::fs::write(
            &path,
            r#"
                [source]
                uri = "u"
                db_name = "s"
                [target]
                uri = "u"
                db_name = "t"
                [store]
                kind = "filesystem"
                directory = "/tmp/segments"
            "#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.source.db_name, "s");
    }
}
