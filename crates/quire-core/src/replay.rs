//! Fixup applied to history entries replayed into the relational backend.
//!
//! Entries written to the key-value backend may lack a snapshot, or carry a
//! snapshot whose own repository id is blank. Before such an entry is saved
//! relationally it is reconciled with the parent contact already present in
//! the relational store:
//!
//! | snapshot | relational parent | outcome                         |
//! |----------|-------------------|---------------------------------|
//! | absent   | present           | snapshot filled from the parent |
//! | absent   | absent            | entry kept without a snapshot   |
//! | present  | absent            | consistency error               |
//! | present  | present           | entry kept as is                |
//!
//! A present snapshot naming a different non-empty repository id than the
//! entry's parent reference is a consistency error in every case.

use tracing::{debug, error};

use crate::contact::ContactResource;
use crate::error::{ErrorCode, QuireError, QuireResult};
use crate::history::{ContactHistory, HistoryEntry};
use crate::key::{BackendKey, EntityKind, SqlKey};
use crate::transaction::{Backend, Transaction};

impl ContactHistory {
    /// Reconcile this entry with its relational parent, read through `tx`.
    ///
    /// `tx` must run against the relational backend. Returns the entry to
    /// save; `self` is consumed and never modified in place.
    pub fn before_sql_save_on_replay(
        self,
        tx: &mut dyn Transaction,
    ) -> QuireResult<ContactHistory> {
        if tx.backend() != Backend::Sql {
            return Err(QuireError::validation(format!(
                "replay fixup must run in a {} transaction, not {}",
                Backend::Sql,
                tx.backend()
            )));
        }

        let repo_id = self.contact_repo_id().to_string();
        if let Some(snapshot) = self.contact_base() {
            if !snapshot.repo_id().is_empty() && snapshot.repo_id() != repo_id {
                error!(
                    revision_id = self.revision_id(),
                    contact_repo_id = %repo_id,
                    snapshot_repo_id = %snapshot.repo_id(),
                    "Replayed history snapshot names a different contact"
                );
                return Err(QuireError::consistency(
                    format!(
                        "history {} references contact '{}' but its snapshot is of '{}'",
                        self.revision_id(),
                        repo_id,
                        snapshot.repo_id()
                    ),
                    ErrorCode::CstReplayMismatch,
                ));
            }
        }

        let parent = load_parent(tx, &repo_id)?;

        match (self.contact_base().is_some(), parent) {
            (false, Some(parent)) => {
                debug!(
                    revision_id = self.revision_id(),
                    contact_repo_id = %repo_id,
                    "Filling replayed history snapshot from relational parent"
                );
                self.to_builder().set_contact(&parent).build()
            }
            (false, None) => Ok(self),
            (true, None) => {
                error!(
                    revision_id = self.revision_id(),
                    contact_repo_id = %repo_id,
                    "Replayed history has a snapshot but no relational parent"
                );
                Err(QuireError::consistency(
                    format!(
                        "history {} has a snapshot but contact '{}' is not in the relational store",
                        self.revision_id(),
                        repo_id
                    ),
                    ErrorCode::CstParentMissing,
                ))
            }
            (true, Some(_)) => Ok(self),
        }
    }
}

impl HistoryEntry {
    /// Dispatch the replay fixup to the concrete entry type.
    pub fn before_sql_save_on_replay(self, tx: &mut dyn Transaction) -> QuireResult<HistoryEntry> {
        match self {
            HistoryEntry::Contact(history) => {
                history.before_sql_save_on_replay(tx).map(HistoryEntry::Contact)
            }
        }
    }
}

fn load_parent(tx: &mut dyn Transaction, repo_id: &str) -> QuireResult<Option<ContactResource>> {
    let key = BackendKey::Sql(SqlKey::Text(repo_id.to_string()));
    match tx.load(EntityKind::ContactResource, &key) {
        Ok(entity) => ContactResource::try_from(entity).map(Some),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Persistable};
    use crate::history::HistoryType;
    use chrono::{TimeZone, Utc};

    /// Relational transaction stand-in holding at most one contact.
    struct ParentOnly {
        backend: Backend,
        parent: Option<ContactResource>,
    }

    impl Transaction for ParentOnly {
        fn backend(&self) -> Backend {
            self.backend
        }

        fn insert(&mut self, _entity: Entity) -> QuireResult<()> {
            Err(QuireError::Internal("read only".to_string()))
        }

        fn put(&mut self, _entity: Entity) -> QuireResult<()> {
            Err(QuireError::Internal("read only".to_string()))
        }

        fn load(&mut self, kind: EntityKind, key: &BackendKey) -> QuireResult<Entity> {
            let wanted = key.to_sql_key(kind)?;
            match &self.parent {
                Some(contact)
                    if kind == EntityKind::ContactResource && contact.sql_key() == wanted =>
                {
                    Ok(Entity::from(contact.clone()))
                }
                _ => Err(QuireError::not_found(key.to_string())),
            }
        }

        fn list_history(&mut self, _repo_id: &str) -> QuireResult<Vec<HistoryEntry>> {
            Ok(Vec::new())
        }

        fn commit(self: Box<Self>) -> QuireResult<()> {
            Ok(())
        }
    }

    fn contact(repo_id: &str) -> ContactResource {
        ContactResource::builder()
            .set_repo_id(repo_id)
            .set_contact_id("contactId")
            .set_email_address(Some("jd@example.com".to_string()))
            .build()
            .unwrap()
    }

    fn entry() -> crate::history::ContactHistoryBuilder {
        ContactHistory::builder()
            .set_type(HistoryType::ContactCreate)
            .set_modification_time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
            .set_registrar_id("TheRegistrar")
            .set_contact_repo_id("contact1")
    }

    fn sql_tx(parent: Option<ContactResource>) -> ParentOnly {
        ParentOnly {
            backend: Backend::Sql,
            parent,
        }
    }

    #[test]
    fn test_absent_snapshot_filled_from_parent() {
        let parent = contact("contact1");
        let fixed = entry()
            .build()
            .unwrap()
            .before_sql_save_on_replay(&mut sql_tx(Some(parent.clone())))
            .unwrap();
        assert_eq!(fixed.contact_base(), Some(parent.base()));
        assert_eq!(fixed.contact_repo_id(), "contact1");
    }

    #[test]
    fn test_absent_snapshot_without_parent_kept() {
        let legacy = entry().build().unwrap();
        let fixed = legacy.clone().before_sql_save_on_replay(&mut sql_tx(None)).unwrap();
        assert_eq!(fixed, legacy);
    }

    #[test]
    fn test_present_snapshot_without_parent_rejected() {
        let history = entry().set_contact(&contact("contact1")).build().unwrap();
        let err = history.before_sql_save_on_replay(&mut sql_tx(None)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CstParentMissing);
    }

    #[test]
    fn test_mismatched_snapshot_rejected() {
        let history = entry().set_contact(&contact("other")).build().unwrap();
        let err = history
            .before_sql_save_on_replay(&mut sql_tx(Some(contact("contact1"))))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CstReplayMismatch);
    }

    #[test]
    fn test_blank_snapshot_id_accepted() {
        let snapshot = contact("contact1")
            .base()
            .to_builder()
            .set_repo_id("")
            .build_base()
            .unwrap();
        let history = entry().set_contact(snapshot).build().unwrap();
        let fixed = history
            .clone()
            .before_sql_save_on_replay(&mut sql_tx(Some(contact("contact1"))))
            .unwrap();
        assert_eq!(fixed, history);
    }

    #[test]
    fn test_requires_relational_transaction() {
        let mut tx = ParentOnly {
            backend: Backend::Kv,
            parent: None,
        };
        let err = entry()
            .build()
            .unwrap()
            .as_history_entry()
            .before_sql_save_on_replay(&mut tx)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
    }
}
