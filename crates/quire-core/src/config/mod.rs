//! Configuration for quire.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

use crate::error::{QuireError, QuireResult};
use crate::transaction::Backend;

/// Stage of the move from the key-value backend to the relational backend.
///
/// The stage decides which backend is authoritative, whether writes are
/// mirrored to the other one, and whether writes are accepted at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MigrationState {
    #[default]
    KvOnly,
    KvPrimary,
    KvPrimaryReadOnly,
    SqlPrimary,
    SqlPrimaryReadOnly,
    SqlOnly,
}

impl MigrationState {
    /// Backend whose contents are authoritative.
    pub fn primary(&self) -> Backend {
        match self {
            Self::KvOnly | Self::KvPrimary | Self::KvPrimaryReadOnly => Backend::Kv,
            Self::SqlPrimary | Self::SqlPrimaryReadOnly | Self::SqlOnly => Backend::Sql,
        }
    }

    /// Backend that receives mirrored writes, if any.
    pub fn secondary(&self) -> Option<Backend> {
        match self {
            Self::KvPrimary => Some(Backend::Sql),
            Self::SqlPrimary => Some(Backend::Kv),
            _ => None,
        }
    }

    /// Whether writes are rejected.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::KvPrimaryReadOnly | Self::SqlPrimaryReadOnly)
    }
}

/// Key-value backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KvConfig {
    /// File the store is flushed to on commit. In memory only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Relational backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: quire_dir().join("quire.db"),
        }
    }
}

/// Main quire configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QuireConfig {
    /// Current migration stage.
    pub migration_state: MigrationState,
    /// Key-value backend.
    pub kv: KvConfig,
    /// Relational backend.
    pub sql: SqlConfig,
}

fn quire_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".quire"))
        .unwrap_or_else(|| PathBuf::from(".quire"))
}

impl QuireConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> QuireResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| QuireError::Configuration(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| QuireError::Configuration(e.to_string()))
            }
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| QuireError::Configuration(e.to_string()))
            }
            _ => Err(QuireError::Configuration(
                "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> QuireResult<Self> {
        let mut config = Self::default();

        if let Ok(state) = std::env::var("QUIRE_MIGRATION_STATE") {
            config.migration_state = state.parse().map_err(|_| {
                QuireError::Configuration(format!("Unknown migration state '{}'", state))
            })?;
        }
        if let Ok(path) = std::env::var("QUIRE_SQL_PATH") {
            config.sql.path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("QUIRE_KV_PATH") {
            config.kv.path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> QuireConfigBuilder {
        QuireConfigBuilder::default()
    }
}

/// Builder for QuireConfig.
#[derive(Default)]
pub struct QuireConfigBuilder {
    config: QuireConfig,
}

impl QuireConfigBuilder {
    pub fn migration_state(mut self, state: MigrationState) -> Self {
        self.config.migration_state = state;
        self
    }

    pub fn kv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kv.path = Some(path.into());
        self
    }

    pub fn sql_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sql.path = path.into();
        self
    }

    pub fn build(self) -> QuireConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_migration_state_routing() {
        assert_eq!(MigrationState::KvOnly.primary(), Backend::Kv);
        assert_eq!(MigrationState::KvOnly.secondary(), None);
        assert_eq!(MigrationState::KvPrimary.secondary(), Some(Backend::Sql));
        assert_eq!(MigrationState::SqlPrimary.primary(), Backend::Sql);
        assert_eq!(MigrationState::SqlPrimary.secondary(), Some(Backend::Kv));
        assert!(MigrationState::SqlPrimaryReadOnly.is_read_only());
        assert!(!MigrationState::SqlOnly.is_read_only());
    }

    #[test]
    fn test_migration_state_names() {
        assert_eq!(MigrationState::KvPrimaryReadOnly.to_string(), "KV_PRIMARY_READ_ONLY");
        assert_eq!("sql_only".parse::<MigrationState>().unwrap(), MigrationState::SqlOnly);
    }

    #[test]
    fn test_default_paths() {
        let config = QuireConfig::default();
        assert_eq!(config.migration_state, MigrationState::KvOnly);
        assert!(config.kv.path.is_none());
        assert!(config.sql.path.ends_with(".quire/quire.db"));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "migration_state = \"SQL_PRIMARY\"\n\n[sql]\npath = \"/tmp/quire-test.db\""
        )
        .unwrap();

        let config = QuireConfig::from_file(file.path()).unwrap();
        assert_eq!(config.migration_state, MigrationState::SqlPrimary);
        assert_eq!(config.sql.path, PathBuf::from("/tmp/quire-test.db"));
        assert!(config.kv.path.is_none());
    }

    #[test]
    fn test_from_yaml_and_json_files() {
        let mut yaml = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml, "migration_state: KV_PRIMARY\nkv:\n  path: /tmp/kv.json").unwrap();
        let config = QuireConfig::from_file(yaml.path()).unwrap();
        assert_eq!(config.migration_state, MigrationState::KvPrimary);
        assert_eq!(config.kv.path, Some(PathBuf::from("/tmp/kv.json")));

        let mut json = Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(json, "{{\"migration_state\": \"SQL_ONLY\"}}").unwrap();
        let config = QuireConfig::from_file(json.path()).unwrap();
        assert_eq!(config.migration_state, MigrationState::SqlOnly);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = Builder::new().suffix(".ini").tempfile().unwrap();
        let err = QuireConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, QuireError::Configuration(_)));
    }

    #[test]
    fn test_builder() {
        let config = QuireConfig::builder()
            .migration_state(MigrationState::KvPrimary)
            .kv_path("/tmp/kv.json")
            .sql_path("/tmp/sql.db")
            .build();
        assert_eq!(config.kv.path, Some(PathBuf::from("/tmp/kv.json")));
        assert_eq!(config.sql.path, PathBuf::from("/tmp/sql.db"));
    }
}
