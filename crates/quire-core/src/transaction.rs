//! The transaction contract every backend implements.
//!
//! A [`TransactionManager`] hands out [`Transaction`]s. All reads and writes
//! inside one transaction see each other; [`Transaction::commit`] makes them
//! durable together, and dropping an uncommitted transaction discards them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::entity::{Entity, Persistable};
use crate::error::QuireResult;
use crate::history::HistoryEntry;
use crate::key::{BackendKey, EntityKind, VKey};

/// Which persistence backend a manager fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Backend {
    /// Hierarchical key-value store.
    Kv,
    /// Relational store.
    Sql,
}

/// One unit of atomic work against a backend.
pub trait Transaction {
    /// Backend this transaction runs against.
    fn backend(&self) -> Backend;

    /// Store a new entity. Fails with a constraint error if its key is taken.
    fn insert(&mut self, entity: Entity) -> QuireResult<()>;

    /// Store an entity, replacing whatever is stored under its key.
    fn put(&mut self, entity: Entity) -> QuireResult<()>;

    /// Load the entity of `kind` stored under `key`.
    ///
    /// `kind` may be abstract; the stored concrete subtype is returned.
    /// Fails with a not-found error if nothing is stored.
    fn load(&mut self, kind: EntityKind, key: &BackendKey) -> QuireResult<Entity>;

    /// Whether an entity of `kind` is stored under `key`.
    fn exists(&mut self, kind: EntityKind, key: &BackendKey) -> QuireResult<bool> {
        match self.load(kind, key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// History entries of the parent `repo_id`, oldest first.
    fn list_history(&mut self, repo_id: &str) -> QuireResult<Vec<HistoryEntry>>;

    /// Revision id for the next history entry of `repo_id`, one past the
    /// largest stored or staged in this transaction.
    fn next_revision_id(&mut self, repo_id: &str) -> QuireResult<i64> {
        let last = self
            .list_history(repo_id)?
            .iter()
            .map(HistoryEntry::revision_id)
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }

    /// Make every write of this transaction durable.
    fn commit(self: Box<Self>) -> QuireResult<()>;
}

/// Factory of transactions against one backend.
pub trait TransactionManager: Send + Sync {
    fn backend(&self) -> Backend;

    /// Start a transaction.
    fn begin(&self) -> QuireResult<Box<dyn Transaction + '_>>;
}

/// Typed helpers over [`Transaction`].
pub trait TransactionExt: Transaction {
    /// Load the entity named by `key`.
    fn load_by_key<T: Persistable>(&mut self, key: &VKey<T>) -> QuireResult<T> {
        let entity = self.load(key.kind(), key.backend_key())?;
        T::try_from(entity)
    }

    /// Reload the stored version of `entity`.
    fn load_by_entity<T: Persistable>(&mut self, entity: &T) -> QuireResult<T> {
        self.load_by_key(&VKey::<T>::from_sql(entity.sql_key()))
    }
}

impl<X: Transaction + ?Sized> TransactionExt for X {}

/// Run-in-transaction helpers over [`TransactionManager`].
pub trait TransactionManagerExt: TransactionManager {
    /// Run `work` inside a fresh transaction.
    ///
    /// The transaction commits if `work` succeeds and is rolled back if it
    /// fails; the error from `work` is returned unchanged.
    fn transact<R>(
        &self,
        work: impl FnOnce(&mut dyn Transaction) -> QuireResult<R>,
    ) -> QuireResult<R> {
        let mut tx = self.begin()?;
        match work(tx.as_mut()) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                debug!(backend = %self.backend(), error = %e, "Rolling back transaction");
                drop(tx);
                Err(e)
            }
        }
    }

    fn insert<T: Persistable>(&self, entity: &T) -> QuireResult<()> {
        self.transact(|tx| tx.insert(entity.clone().into()))
    }

    fn put<T: Persistable>(&self, entity: &T) -> QuireResult<()> {
        self.transact(|tx| tx.put(entity.clone().into()))
    }

    fn load_by_key<T: Persistable>(&self, key: &VKey<T>) -> QuireResult<T> {
        self.transact(|tx| tx.load_by_key(key))
    }

    fn load_by_entity<T: Persistable>(&self, entity: &T) -> QuireResult<T> {
        self.transact(|tx| tx.load_by_entity(entity))
    }

    fn exists<T: Persistable>(&self, key: &VKey<T>) -> QuireResult<bool> {
        self.transact(|tx| tx.exists(key.kind(), key.backend_key()))
    }

    fn list_history(&self, repo_id: &str) -> QuireResult<Vec<HistoryEntry>> {
        self.transact(|tx| tx.list_history(repo_id))
    }
}

impl<M: TransactionManager + ?Sized> TransactionManagerExt for M {}
