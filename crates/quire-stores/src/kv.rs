//! Hierarchical key-value transaction manager.
//!
//! Entities live in an ordered map keyed by [`KvKey`], each tagged with the
//! concrete kind it was written as. A transaction holds the store lock for
//! its whole life and stages its writes; commit applies them in one step and,
//! when the manager has a backing file, flushes the full store to it first.
//!
//! Lookups go through the alias table: a key spelled with a subtype's own
//! name is retried under the kind's storage category before the lookup is
//! reported as missing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use quire_core::error::{QuireError, QuireResult};
use quire_core::history::HistoryEntry;
use quire_core::key::{BackendKey, EntityKind, KeyId, KvKey, CONTACT_CATEGORY};
use quire_core::transaction::{Backend, Transaction, TransactionManager};
use quire_core::Entity;

/// One stored value and the concrete kind it was written as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredEntity {
    kind: EntityKind,
    payload: serde_json::Value,
}

/// On-disk form of one map entry.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: KvKey,
    kind: EntityKind,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct KvState {
    entities: BTreeMap<KvKey, StoredEntity>,
}

/// Transaction manager over the key-value store.
pub struct KvTransactionManager {
    state: Mutex<KvState>,
    path: Option<PathBuf>,
}

impl KvTransactionManager {
    /// Create an empty store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(KvState::default()),
            path: None,
        }
    }

    /// Open a store backed by `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> QuireResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = KvState::default();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let records: Vec<FileRecord> = serde_json::from_str(&content)?;
            for record in records {
                state.entities.insert(
                    record.key,
                    StoredEntity {
                        kind: record.kind,
                        payload: record.payload,
                    },
                );
            }
            info!(
                path = %path.display(),
                entities = state.entities.len(),
                "Loaded key-value store"
            );
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    /// Number of committed entities.
    pub fn len(&self) -> QuireResult<usize> {
        Ok(self.lock()?.entities.len())
    }

    pub fn is_empty(&self) -> QuireResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> QuireResult<MutexGuard<'_, KvState>> {
        self.state
            .lock()
            .map_err(|_| QuireError::database("key-value store lock poisoned"))
    }
}

impl TransactionManager for KvTransactionManager {
    fn backend(&self) -> Backend {
        Backend::Kv
    }

    fn begin(&self) -> QuireResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(KvTransaction {
            state: self.lock()?,
            staged: BTreeMap::new(),
            path: self.path.as_deref(),
            finished: false,
        }))
    }
}

/// A transaction against [`KvTransactionManager`].
pub struct KvTransaction<'a> {
    state: MutexGuard<'a, KvState>,
    staged: BTreeMap<KvKey, StoredEntity>,
    path: Option<&'a Path>,
    finished: bool,
}

impl KvTransaction<'_> {
    fn get(&self, key: &KvKey) -> Option<&StoredEntity> {
        self.staged.get(key).or_else(|| self.state.entities.get(key))
    }

    /// Committed entities overlaid with this transaction's writes.
    fn merged(&self) -> BTreeMap<&KvKey, &StoredEntity> {
        let mut view: BTreeMap<&KvKey, &StoredEntity> = self.state.entities.iter().collect();
        view.extend(self.staged.iter());
        view
    }

    fn stage(&mut self, entity: Entity) -> QuireResult<KvKey> {
        let key = entity.kv_key()?;
        let stored = StoredEntity {
            kind: entity.kind(),
            payload: entity.to_json()?,
        };
        self.staged.insert(key.clone(), stored);
        Ok(key)
    }

    fn flush(&self, path: &Path) -> QuireResult<()> {
        let records: Vec<FileRecord> = self
            .merged()
            .into_iter()
            .map(|(key, stored)| FileRecord {
                key: key.clone(),
                kind: stored.kind,
                payload: stored.payload.clone(),
            })
            .collect();
        let content = serde_json::to_string(&records)?;

        // The store file is only ever replaced whole, by renaming a fully
        // written sibling over it.
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, content)?;
        std::fs::rename(&staging, path)?;
        Ok(())
    }
}

impl Transaction for KvTransaction<'_> {
    fn backend(&self) -> Backend {
        Backend::Kv
    }

    fn insert(&mut self, entity: Entity) -> QuireResult<()> {
        let key = entity.kv_key()?;
        if self.get(&key).is_some() {
            return Err(QuireError::constraint(key.to_string()));
        }
        self.stage(entity)?;
        Ok(())
    }

    fn put(&mut self, entity: Entity) -> QuireResult<()> {
        self.stage(entity)?;
        Ok(())
    }

    fn load(&mut self, kind: EntityKind, key: &BackendKey) -> QuireResult<Entity> {
        let kv_key = key.to_kv_key(kind)?;
        let aliased = kv_key.with_kind(kind.kv_category());

        for candidate in [&kv_key, &aliased] {
            if let Some(stored) = self.get(candidate) {
                if kind.is_assignable_from(stored.kind) {
                    debug!(%kind, key = %candidate, stored_kind = %stored.kind, "Loaded entity");
                    return Entity::from_json(stored.kind, stored.payload.clone());
                }
            }
        }

        Err(QuireError::not_found(format!("{} {}", kind, kv_key)))
    }

    fn list_history(&mut self, repo_id: &str) -> QuireResult<Vec<HistoryEntry>> {
        let parent = KvKey::root(CONTACT_CATEGORY, KeyId::name(repo_id));

        let mut entries = self
            .merged()
            .into_iter()
            .filter(|(key, stored)| {
                key.parent().as_ref() == Some(&parent)
                    && EntityKind::HistoryEntry.is_assignable_from(stored.kind)
            })
            .map(|(_, stored)| {
                Entity::from_json(stored.kind, stored.payload.clone())
                    .and_then(HistoryEntry::try_from)
            })
            .collect::<QuireResult<Vec<_>>>()?;

        entries.sort_by_key(|e| (e.modification_time(), e.revision_id()));
        Ok(entries)
    }

    fn commit(mut self: Box<Self>) -> QuireResult<()> {
        if let Some(path) = self.path {
            self.flush(path)?;
        }

        let staged = std::mem::take(&mut self.staged);
        let written = staged.len();
        self.state.entities.extend(staged);
        self.finished = true;
        debug!(backend = %Backend::Kv, written, "Committed transaction");
        Ok(())
    }
}

impl Drop for KvTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            debug!(
                backend = %Backend::Kv,
                discarded = self.staged.len(),
                "Discarding uncommitted writes"
            );
        }
    }
}
