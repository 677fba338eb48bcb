//! Writes routed by migration state, and cross-backend parity checks.
//!
//! The primary backend is authoritative: a failed primary write fails the
//! call. When the state mirrors writes, the secondary is written afterwards
//! in its own transaction. There is no atomicity across the two, so a failed
//! mirror write is logged and reported as divergence for a later replay or
//! parity check to resolve.

use std::sync::Arc;

use tracing::{info, warn};

use quire_core::compare::{assert_histories_equal, differing_fields};
use quire_core::config::MigrationState;
use quire_core::entity::{Entity, Persistable};
use quire_core::error::{QuireError, QuireResult};
use quire_core::history::ContactHistory;
use quire_core::key::VKey;
use quire_core::mutation::{record_mutation, MutationDescriptor};
use quire_core::transaction::{Backend, TransactionManager, TransactionManagerExt};

/// Outcome of one routed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub primary: Backend,
    /// Backend the write was mirrored to, if the state mirrors writes.
    pub mirrored: Option<Backend>,
    /// Why the mirror write failed, if it did.
    pub divergence: Option<String>,
}

impl WriteReport {
    pub fn is_diverged(&self) -> bool {
        self.divergence.is_some()
    }
}

/// Routes writes to the backends selected by a [`MigrationState`].
pub struct DualWriter {
    kv: Arc<dyn TransactionManager>,
    sql: Arc<dyn TransactionManager>,
    state: MigrationState,
}

impl DualWriter {
    pub fn new(
        kv: Arc<dyn TransactionManager>,
        sql: Arc<dyn TransactionManager>,
        state: MigrationState,
    ) -> Self {
        Self { kv, sql, state }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Move to another migration stage.
    pub fn set_state(&mut self, state: MigrationState) {
        if state != self.state {
            info!(from = %self.state, to = %state, "Migration state changed");
            self.state = state;
        }
    }

    /// Manager for one backend, whatever the current state.
    pub fn manager(&self, backend: Backend) -> &Arc<dyn TransactionManager> {
        match backend {
            Backend::Kv => &self.kv,
            Backend::Sql => &self.sql,
        }
    }

    /// Manager reads should go to.
    pub fn primary(&self) -> &Arc<dyn TransactionManager> {
        self.manager(self.state.primary())
    }

    fn check_writable(&self) -> QuireResult<()> {
        if self.state.is_read_only() {
            return Err(QuireError::read_only(format!(
                "writes are disabled in migration state {}",
                self.state
            )));
        }
        Ok(())
    }

    fn mirror(
        &self,
        what: &str,
        write: impl FnOnce(&dyn TransactionManager) -> QuireResult<()>,
    ) -> WriteReport {
        let mirrored = self.state.secondary();
        let divergence = mirrored.and_then(|backend| match write(&**self.manager(backend)) {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    migration_state = %self.state,
                    secondary = %backend,
                    entity = what,
                    error = %e,
                    "Mirror write failed; backends have diverged"
                );
                Some(e.to_string())
            }
        });
        WriteReport {
            primary: self.state.primary(),
            mirrored,
            divergence,
        }
    }

    /// Insert into the primary backend, then mirror.
    pub fn insert<T: Persistable>(&self, entity: &T) -> QuireResult<WriteReport> {
        self.check_writable()?;
        self.primary().insert(entity)?;
        let what: Entity = entity.clone().into();
        Ok(self.mirror(&what.to_string(), |tm| tm.insert(entity)))
    }

    /// Insert or replace in the primary backend, then mirror.
    pub fn put<T: Persistable>(&self, entity: &T) -> QuireResult<WriteReport> {
        self.check_writable()?;
        self.primary().put(entity)?;
        let what: Entity = entity.clone().into();
        Ok(self.mirror(&what.to_string(), |tm| tm.put(entity)))
    }

    /// Record a contact mutation in the primary backend and mirror the
    /// resulting contact and history entry.
    pub fn record_mutation(
        &self,
        descriptor: &MutationDescriptor,
    ) -> QuireResult<(ContactHistory, WriteReport)> {
        self.check_writable()?;
        let history = record_mutation(&**self.primary(), descriptor)?;

        let what = Entity::from(history.clone()).to_string();
        let report = self.mirror(&what, |tm| {
            tm.transact(|tx| {
                let contact = history
                    .contact_base()
                    .ok_or_else(|| {
                        QuireError::Internal("recorded history has no snapshot".to_string())
                    })
                    .and_then(quire_core::ContactResource::from_snapshot)?;
                tx.put(contact.into())?;
                tx.insert(history.clone().into())
            })
        });
        Ok((history, report))
    }

    /// Load from the primary backend.
    pub fn load<T: Persistable>(&self, key: &VKey<T>) -> QuireResult<T> {
        key.resolve(&**self.primary())
    }

    /// Load `key` from both backends and check that they agree.
    ///
    /// History entries are compared without their snapshot and parent
    /// reference, then snapshot against snapshot without the snapshot id.
    /// Anything else must match on every field.
    pub fn verify_parity<T: Persistable>(&self, key: &VKey<T>) -> QuireResult<()> {
        let from_kv: Entity = key.resolve(&*self.kv)?.into();
        let from_sql: Entity = key.resolve(&*self.sql)?.into();

        match (&from_kv, &from_sql) {
            (Entity::ContactHistory(a), Entity::ContactHistory(b)) => assert_histories_equal(a, b),
            (Entity::Contact(a), Entity::Contact(b)) => {
                let fields = differing_fields(a, b, &[])?;
                if fields.is_empty() {
                    return Ok(());
                }
                Err(QuireError::field_mismatch(
                    format!("{} differs between backends", from_kv),
                    fields,
                ))
            }
            _ => Err(QuireError::field_mismatch(
                format!("{} resolves to {} in the relational backend", from_kv, from_sql),
                vec!["kind".to_string()],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvTransactionManager;
    use crate::sql::SqlTransactionManager;
    use quire_core::error::ErrorCode;
    use quire_core::ContactResource;

    fn writer(state: MigrationState) -> DualWriter {
        DualWriter::new(
            Arc::new(KvTransactionManager::in_memory()),
            Arc::new(SqlTransactionManager::in_memory().unwrap()),
            state,
        )
    }

    fn contact() -> ContactResource {
        ContactResource::builder()
            .set_repo_id("contact1")
            .set_contact_id("contactId")
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_backend_state_does_not_mirror() {
        let dual = writer(MigrationState::KvOnly);
        let report = dual.insert(&contact()).unwrap();
        assert_eq!(report.mirrored, None);
        assert!(!dual.manager(Backend::Sql).exists(&contact().create_vkey()).unwrap());
    }

    #[test]
    fn test_mirrored_write_reaches_both() {
        let dual = writer(MigrationState::SqlPrimary);
        let report = dual.insert(&contact()).unwrap();
        assert_eq!(report.primary, Backend::Sql);
        assert_eq!(report.mirrored, Some(Backend::Kv));
        assert!(!report.is_diverged());
        dual.verify_parity(&contact().create_vkey()).unwrap();
    }

    #[test]
    fn test_mirror_failure_reported_not_fatal() {
        let dual = writer(MigrationState::KvPrimary);
        dual.manager(Backend::Sql).insert(&contact()).unwrap();

        let report = dual.insert(&contact()).unwrap();
        assert!(report.is_diverged());
        assert!(dual.primary().exists(&contact().create_vkey()).unwrap());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut dual = writer(MigrationState::KvPrimary);
        dual.set_state(MigrationState::KvPrimaryReadOnly);
        let err = dual.put(&contact()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValReadOnly);
    }

    #[test]
    fn test_parity_reports_differing_fields() {
        let dual = writer(MigrationState::KvOnly);
        dual.manager(Backend::Kv).insert(&contact()).unwrap();
        let changed = contact().to_builder().set_contact_id("changed").build().unwrap();
        dual.manager(Backend::Sql).insert(&changed).unwrap();

        match dual.verify_parity(&contact().create_vkey()).unwrap_err() {
            QuireError::Consistency { fields, .. } => {
                assert_eq!(fields, vec!["contact_id".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
