//! quire-stores - Transaction managers for quire.
//!
//! Two backends implement the `quire_core::transaction` contract:
//!
//! - `kv`: hierarchical key-value store, optionally flushed to a JSON file
//! - `sql`: relational store on SQLite
//!
//! On top of them, `dual` routes writes by migration state and checks parity
//! between backends, and `migrate` replays key-value history into the
//! relational backend.

pub mod dual;
pub mod factory;
pub mod kv;
pub mod migrate;
pub mod sql;

pub use dual::{DualWriter, WriteReport};
pub use factory::TransactionManagerFactory;
pub use kv::KvTransactionManager;
pub use migrate::{migrate_contact, replay_history_to_sql, ReplayReport};
pub use sql::SqlTransactionManager;
