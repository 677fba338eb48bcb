//! Factory for creating transaction managers.

use std::path::Path;
use std::sync::Arc;

use quire_core::config::QuireConfig;
use quire_core::error::QuireResult;
use quire_core::transaction::{Backend, TransactionManager};
use tracing::info;

use crate::dual::DualWriter;
use crate::kv::KvTransactionManager;
use crate::sql::SqlTransactionManager;

/// Path value that selects an in-memory relational database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Factory for creating transaction managers.
pub struct TransactionManagerFactory;

impl TransactionManagerFactory {
    /// Create the manager for `backend` from the given configuration.
    pub fn create(
        backend: Backend,
        config: &QuireConfig,
    ) -> QuireResult<Arc<dyn TransactionManager>> {
        match backend {
            Backend::Kv => {
                let manager = match &config.kv.path {
                    Some(path) => KvTransactionManager::open(path)?,
                    None => KvTransactionManager::in_memory(),
                };
                Ok(Arc::new(manager))
            }
            Backend::Sql => {
                let manager = if config.sql.path == Path::new(IN_MEMORY_PATH) {
                    SqlTransactionManager::in_memory()?
                } else {
                    SqlTransactionManager::open(&config.sql.path)?
                };
                Ok(Arc::new(manager))
            }
        }
    }

    /// Create both managers, routed by the configured migration state.
    pub fn create_dual(config: &QuireConfig) -> QuireResult<DualWriter> {
        let kv = Self::create(Backend::Kv, config)?;
        let sql = Self::create(Backend::Sql, config)?;
        info!(
            migration_state = %config.migration_state,
            primary = %config.migration_state.primary(),
            "Created transaction managers"
        );
        Ok(DualWriter::new(kv, sql, config.migration_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::config::MigrationState;

    #[test]
    fn test_create_in_memory_backends() {
        let config = QuireConfig::builder()
            .migration_state(MigrationState::KvPrimary)
            .sql_path(IN_MEMORY_PATH)
            .build();

        let kv = TransactionManagerFactory::create(Backend::Kv, &config).unwrap();
        let sql = TransactionManagerFactory::create(Backend::Sql, &config).unwrap();
        assert_eq!(kv.backend(), Backend::Kv);
        assert_eq!(sql.backend(), Backend::Sql);

        let dual = TransactionManagerFactory::create_dual(&config).unwrap();
        assert_eq!(dual.primary().backend(), Backend::Kv);
    }

    #[test]
    fn test_create_file_backends() {
        let dir = tempfile::tempdir().unwrap();
        let config = QuireConfig::builder()
            .kv_path(dir.path().join("kv.json"))
            .sql_path(dir.path().join("quire.db"))
            .build();

        TransactionManagerFactory::create(Backend::Sql, &config).unwrap();
        TransactionManagerFactory::create(Backend::Kv, &config).unwrap();
        assert!(dir.path().join("quire.db").exists());
    }
}
