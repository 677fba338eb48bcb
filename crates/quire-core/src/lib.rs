//! quire-core - Core library for quire.
//!
//! This crate provides contact records, their history entries, backend
//! agnostic keys, the redaction policy and the transaction contract that the
//! key-value and relational backends in `quire-stores` implement.
//!
//! # Example
//!
//! ```ignore
//! use quire_core::{record_mutation, HistoryType, MutationDescriptor, TransactionManagerExt};
//!
//! let history = record_mutation(&tm, &MutationDescriptor {
//!     event_type: HistoryType::ContactCreate,
//!     contact,
//!     ..descriptor
//! })?;
//!
//! // Reload through a backend-agnostic key
//! let reloaded = history.create_vkey().resolve(&tm)?;
//! ```

pub mod clock;
pub mod compare;
pub mod config;
pub mod contact;
pub mod entity;
pub mod error;
pub mod history;
pub mod key;
pub mod mutation;
pub mod redaction;
pub mod replay;
pub mod transaction;

// Re-export commonly used types
pub use clock::{Clock, FakeClock, SystemClock};
pub use compare::{assert_histories_equal, differing_fields, fields_equal_except};
pub use config::{MigrationState, QuireConfig};
pub use contact::{
    ContactAddress, ContactBase, ContactBuilder, ContactPhoneNumber, ContactResource, PostalInfo,
    PostalInfoType, StatusValue,
};
pub use entity::{Entity, Persistable};
pub use error::{ErrorCode, QuireError, QuireResult};
pub use history::{ContactHistory, ContactHistoryBuilder, HistoryEntry, HistoryType, Trid};
pub use key::{BackendKey, EntityKind, KeyId, KvKey, SqlKey, VKey};
pub use mutation::{record_mutation, record_mutation_in, MutationDescriptor};
pub use redaction::wipe_out_pii;
pub use transaction::{
    Backend, Transaction, TransactionExt, TransactionManager, TransactionManagerExt,
};
