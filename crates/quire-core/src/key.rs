//! Backend-agnostic entity keys.
//!
//! A [`VKey`] names one logical entity. It is built from either backend's
//! native key form ([`KvKey`] for the hierarchical key-value store, [`SqlKey`]
//! for the relational store) and converts to the other form on demand, so
//! callers never need to know which backend will resolve it.
//!
//! Kind aliasing lives here too: some kinds are stored in the key-value
//! backend under their supertype's category (every contact history entry is
//! keyed as a `HistoryEntry`). The alias table below is consulted by both
//! backends before they report a key as missing.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::entity::Persistable;
use crate::error::{QuireError, QuireResult};
use crate::transaction::{TransactionManager, TransactionManagerExt};

/// Key-value category under which parent contact records are stored.
pub const CONTACT_CATEGORY: &str = "ContactResource";
/// Key-value category shared by every history entry subtype.
pub const HISTORY_CATEGORY: &str = "HistoryEntry";

/// Every kind of entity the transaction managers know how to persist.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum EntityKind {
    /// The mutable parent record.
    ContactResource,
    /// History of a contact; stored under the `HistoryEntry` category.
    ContactHistory,
    /// Abstract supertype of all history entries.
    HistoryEntry,
}

/// One row of the alias table.
#[derive(Debug, Clone, Copy)]
struct KindRegistration {
    /// Category name used in key-value keys.
    kv_category: &'static str,
    /// Kind whose lookups must also find this one.
    supertype: Option<EntityKind>,
    /// Abstract kinds have no storage of their own.
    concrete: bool,
}

static KIND_REGISTRY: Lazy<HashMap<EntityKind, KindRegistration>> = Lazy::new(|| {
    HashMap::from([
        (
            EntityKind::ContactResource,
            KindRegistration {
                kv_category: CONTACT_CATEGORY,
                supertype: None,
                concrete: true,
            },
        ),
        (
            EntityKind::ContactHistory,
            KindRegistration {
                kv_category: HISTORY_CATEGORY,
                supertype: Some(EntityKind::HistoryEntry),
                concrete: true,
            },
        ),
        (
            EntityKind::HistoryEntry,
            KindRegistration {
                kv_category: HISTORY_CATEGORY,
                supertype: None,
                concrete: false,
            },
        ),
    ])
});

impl EntityKind {
    fn registration(self) -> KindRegistration {
        // Every variant is registered above.
        KIND_REGISTRY[&self]
    }

    /// Category name this kind is stored under in the key-value backend.
    pub fn kv_category(self) -> &'static str {
        self.registration().kv_category
    }

    /// Direct supertype, if any.
    pub fn supertype(self) -> Option<EntityKind> {
        self.registration().supertype
    }

    /// Whether the kind has storage of its own.
    pub fn is_concrete(self) -> bool {
        self.registration().concrete
    }

    /// Whether a value stored as `stored` satisfies a lookup for `self`.
    pub fn is_assignable_from(self, stored: EntityKind) -> bool {
        let mut current = Some(stored);
        while let Some(kind) = current {
            if kind == self {
                return true;
            }
            current = kind.supertype();
        }
        false
    }

    /// Concrete kinds a lookup for `self` may resolve to, `self` first.
    pub fn concrete_kinds(self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = Vec::new();
        if self.is_concrete() {
            kinds.push(self);
        }
        kinds.extend(
            EntityKind::iter()
                .filter(|k| *k != self && k.is_concrete() && self.is_assignable_from(*k)),
        );
        kinds
    }

    /// Kinds sharing a key-value category name.
    pub fn for_kv_category(category: &str) -> Vec<EntityKind> {
        EntityKind::iter()
            .filter(|k| k.kv_category() == category)
            .collect()
    }

    fn is_history(self) -> bool {
        EntityKind::HistoryEntry.is_assignable_from(self)
    }

    /// Convert a relational key into this kind's key-value form.
    pub fn kv_key_for(self, key: &SqlKey) -> QuireResult<KvKey> {
        match (self.is_history(), key) {
            (false, SqlKey::Text(repo_id)) => {
                Ok(KvKey::root(self.kv_category(), KeyId::name(repo_id)))
            }
            (
                true,
                SqlKey::Revision {
                    repo_id,
                    revision_id,
                },
            ) => Ok(KvKey::root(CONTACT_CATEGORY, KeyId::name(repo_id))
                .child(self.kv_category(), KeyId::Id(*revision_id))),
            _ => Err(QuireError::kind_mismatch(format!(
                "{} cannot be addressed by relational key {}",
                self, key
            ))),
        }
    }

    /// Convert a key-value key into this kind's relational form.
    ///
    /// The leaf element may use either the category name or the kind name.
    pub fn sql_key_for(self, key: &KvKey) -> QuireResult<SqlKey> {
        let leaf = key.leaf();
        let name: &'static str = self.into();
        if leaf.kind != self.kv_category() && leaf.kind != name {
            return Err(QuireError::kind_mismatch(format!(
                "{} cannot be addressed by key-value key {}",
                self, key
            )));
        }

        if !self.is_history() {
            if key.parent().is_some() {
                return Err(QuireError::invalid_key(format!(
                    "{} keys have no ancestor: {}",
                    self, key
                )));
            }
            return match &leaf.id {
                KeyId::Name(repo_id) => Ok(SqlKey::Text(repo_id.clone())),
                KeyId::Id(_) => Err(QuireError::invalid_key(format!(
                    "{} keys are named, not numbered: {}",
                    self, key
                ))),
            };
        }

        let parent = key.parent().ok_or_else(|| {
            QuireError::invalid_key(format!("history key without parent: {}", key))
        })?;
        let parent_leaf = parent.leaf();
        match (&parent_leaf.kind[..], &parent_leaf.id, &leaf.id) {
            (CONTACT_CATEGORY, KeyId::Name(repo_id), KeyId::Id(revision_id)) => {
                Ok(SqlKey::Revision {
                    repo_id: repo_id.clone(),
                    revision_id: *revision_id,
                })
            }
            _ => Err(QuireError::invalid_key(format!(
                "malformed history key: {}",
                key
            ))),
        }
    }
}

/// Identifier of one element in a key-value key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyId {
    Name(String),
    Id(i64),
}

impl KeyId {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Name(name) => write!(f, "\"{}\"", name),
            KeyId::Id(id) => write!(f, "{}", id),
        }
    }
}

/// One `(kind, id)` step in a hierarchical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyElement {
    pub kind: String,
    pub id: KeyId,
}

/// Hierarchical key-value key. The last element names the entity, earlier
/// elements its ancestors (its entity group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "KvKeyPath")]
pub struct KvKey {
    path: Vec<KeyElement>,
}

/// Unchecked serialized form of a [`KvKey`].
#[derive(Deserialize)]
struct KvKeyPath {
    path: Vec<KeyElement>,
}

impl TryFrom<KvKeyPath> for KvKey {
    type Error = QuireError;

    fn try_from(raw: KvKeyPath) -> QuireResult<Self> {
        Self::from_path(raw.path)
    }
}

impl KvKey {
    /// Create a key from its full path, root first.
    pub fn from_path(path: Vec<KeyElement>) -> QuireResult<Self> {
        if path.is_empty() {
            return Err(QuireError::invalid_key("key-value key has an empty path"));
        }
        Ok(Self { path })
    }

    /// Create a key with no ancestor.
    pub fn root(kind: impl Into<String>, id: KeyId) -> Self {
        Self {
            path: vec![KeyElement {
                kind: kind.into(),
                id,
            }],
        }
    }

    /// Create a key whose parent is `self`.
    pub fn child(&self, kind: impl Into<String>, id: KeyId) -> Self {
        let mut path = self.path.clone();
        path.push(KeyElement {
            kind: kind.into(),
            id,
        });
        Self { path }
    }

    /// The element naming the entity itself.
    pub fn leaf(&self) -> &KeyElement {
        // Every constructor rejects an empty path.
        &self.path[self.path.len() - 1]
    }

    /// Leaf kind name.
    pub fn kind(&self) -> &str {
        &self.leaf().kind
    }

    /// The parent key, if this key has an ancestor.
    pub fn parent(&self) -> Option<KvKey> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Same key with the leaf kind replaced.
    pub fn with_kind(&self, kind: &str) -> Self {
        let mut path = self.path.clone();
        let last = path.len() - 1;
        path[last].kind = kind.to_string();
        Self { path }
    }

    /// Path elements, root first.
    pub fn path(&self) -> &[KeyElement] {
        &self.path
    }
}

impl fmt::Display for KvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}({})", element.kind, element.id)?;
        }
        Ok(())
    }
}

/// Relational primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlKey {
    /// Single text primary key (a repository id).
    Text(String),
    /// Composite key of a history row.
    Revision { repo_id: String, revision_id: i64 },
}

impl fmt::Display for SqlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlKey::Text(id) => write!(f, "'{}'", id),
            SqlKey::Revision {
                repo_id,
                revision_id,
            } => write!(f, "('{}', {})", repo_id, revision_id),
        }
    }
}

/// Either backend's native key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKey {
    Kv(KvKey),
    Sql(SqlKey),
}

impl BackendKey {
    /// This key in key-value form for `kind`.
    pub fn to_kv_key(&self, kind: EntityKind) -> QuireResult<KvKey> {
        match self {
            BackendKey::Kv(key) => Ok(key.clone()),
            BackendKey::Sql(key) => kind.kv_key_for(key),
        }
    }

    /// This key in relational form for `kind`.
    pub fn to_sql_key(&self, kind: EntityKind) -> QuireResult<SqlKey> {
        match self {
            BackendKey::Kv(key) => kind.sql_key_for(key),
            BackendKey::Sql(key) => Ok(key.clone()),
        }
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKey::Kv(key) => write!(f, "{}", key),
            BackendKey::Sql(key) => write!(f, "{}", key),
        }
    }
}

/// Typed, backend-agnostic reference to one entity of kind `T`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct VKey<T> {
    kind: EntityKind,
    key: BackendKey,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistable> VKey<T> {
    /// Wrap a key-value key.
    pub fn from_kv(key: KvKey) -> Self {
        Self {
            kind: T::KIND,
            key: BackendKey::Kv(key),
            _marker: PhantomData,
        }
    }

    /// Wrap a relational key.
    pub fn from_sql(key: SqlKey) -> Self {
        Self {
            kind: T::KIND,
            key: BackendKey::Sql(key),
            _marker: PhantomData,
        }
    }

    /// Load the entity from whichever backend `tm` fronts.
    pub fn resolve<M>(&self, tm: &M) -> QuireResult<T>
    where
        M: TransactionManager + ?Sized,
    {
        tm.load_by_key(self)
    }
}

impl<T> VKey<T> {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn backend_key(&self) -> &BackendKey {
        &self.key
    }

    pub fn to_kv_key(&self) -> QuireResult<KvKey> {
        self.key.to_kv_key(self.kind)
    }

    pub fn to_sql_key(&self) -> QuireResult<SqlKey> {
        self.key.to_sql_key(self.kind)
    }

    /// Reinterpret as a key for another kind. The backend key is kept as is,
    /// so lookups through the result go through the alias table.
    pub fn cast<U: Persistable>(&self) -> VKey<U> {
        VKey {
            kind: U::KIND,
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }

    /// Whether both keys name the same logical entity, whatever their form.
    pub fn same_entity<U>(&self, other: &VKey<U>) -> bool {
        match (self.to_sql_key(), other.to_sql_key()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Clone for VKey<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for VKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.key == other.key
    }
}

impl<T> Eq for VKey<T> {}

impl<T> Hash for VKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.key.hash(state);
    }
}

impl<T> fmt::Debug for VKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VKey")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .finish()
    }
}

impl<T> fmt::Display for VKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VKey<{}>({})", self.kind, self.key)
    }
}
