//! Relational transaction manager backed by SQLite.
//!
//! Contacts live in `contact`, history entries in `contact_history`. A
//! history row always carries its parent's repository id in
//! `contact_repo_id`; the embedded snapshot occupies a separate set of
//! nullable columns flagged by `has_contact_snapshot`. The snapshot's own
//! repository id is not stored, so a reloaded snapshot reports the parent
//! reference as its id.
//!
//! # Example
//!
//! ```ignore
//! use quire_stores::SqlTransactionManager;
//!
//! let tm = SqlTransactionManager::open("/var/lib/quire/quire.db")?;
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use quire_core::contact::{
    ContactBase, ContactPhoneNumber, ContactResource, PostalInfo, StatusValue,
};
use quire_core::error::{QuireError, QuireResult};
use quire_core::history::{ContactHistory, HistoryEntry, HistoryType, Trid};
use quire_core::key::{BackendKey, EntityKind, SqlKey};
use quire_core::transaction::{Backend, Transaction, TransactionManager};
use quire_core::Entity;

/// Snapshot columns shared by `contact` and `contact_history`, in bind order.
const CONTACT_FIELDS: &str = "contact_id, creation_registrar_id, current_sponsor_registrar_id, \
     creation_time, last_epp_update_time, last_epp_update_registrar_id, deletion_time, statuses, \
     auth_info_password, email, localized_postal_info, internationalized_postal_info, \
     voice_phone_number, voice_phone_extension, fax_phone_number, fax_phone_extension";
const CONTACT_FIELD_COUNT: usize = 16;

/// History columns of `contact_history`, in bind order.
const HISTORY_FIELDS: &str = "contact_repo_id, history_revision_id, history_type, \
     history_modification_time, history_registrar_id, history_xml_bytes, \
     history_client_transaction_id, history_server_transaction_id, history_by_superuser, \
     history_reason, history_requested_by_registrar, has_contact_snapshot";
const HISTORY_FIELD_COUNT: usize = 12;

/// Transaction manager over a SQLite database.
pub struct SqlTransactionManager {
    conn: Mutex<Connection>,
}

impl SqlTransactionManager {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> QuireResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| QuireError::Database {
            message: format!("Failed to open SQLite database {}: {}", path.display(), e),
            code: quire_core::error::ErrorCode::DbConnectionFailed,
            source: Some(Box::new(e)),
        })?;
        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;
        info!(path = %path.display(), "Opened relational store");
        Ok(manager)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> QuireResult<Self> {
        let conn = Connection::open_in_memory()?;
        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;
        Ok(manager)
    }

    fn lock(&self) -> QuireResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QuireError::database("relational store lock poisoned"))
    }

    fn init_schema(&self) -> QuireResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contact (
                repo_id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL,
                creation_registrar_id TEXT NOT NULL,
                current_sponsor_registrar_id TEXT NOT NULL,
                creation_time TEXT,
                last_epp_update_time TEXT,
                last_epp_update_registrar_id TEXT,
                deletion_time TEXT,
                statuses TEXT NOT NULL,
                auth_info_password TEXT,
                email TEXT,
                localized_postal_info TEXT,
                internationalized_postal_info TEXT,
                voice_phone_number TEXT,
                voice_phone_extension TEXT,
                fax_phone_number TEXT,
                fax_phone_extension TEXT
            );

            -- No foreign key: replayed history may predate its relational parent
            CREATE TABLE IF NOT EXISTS contact_history (
                contact_repo_id TEXT NOT NULL,
                history_revision_id INTEGER NOT NULL,
                history_type TEXT NOT NULL,
                history_modification_time TEXT NOT NULL,
                history_registrar_id TEXT NOT NULL,
                history_xml_bytes BLOB NOT NULL,
                history_client_transaction_id TEXT,
                history_server_transaction_id TEXT,
                history_by_superuser INTEGER NOT NULL,
                history_reason TEXT,
                history_requested_by_registrar INTEGER NOT NULL,
                has_contact_snapshot INTEGER NOT NULL,
                contact_id TEXT,
                creation_registrar_id TEXT,
                current_sponsor_registrar_id TEXT,
                creation_time TEXT,
                last_epp_update_time TEXT,
                last_epp_update_registrar_id TEXT,
                deletion_time TEXT,
                statuses TEXT,
                auth_info_password TEXT,
                email TEXT,
                localized_postal_info TEXT,
                internationalized_postal_info TEXT,
                voice_phone_number TEXT,
                voice_phone_extension TEXT,
                fax_phone_number TEXT,
                fax_phone_extension TEXT,
                PRIMARY KEY (contact_repo_id, history_revision_id)
            );

            CREATE INDEX IF NOT EXISTS idx_contact_history_repo_time
                ON contact_history(contact_repo_id, history_modification_time);
        "#,
        )?;
        debug!("Relational schema ready");
        Ok(())
    }
}

impl TransactionManager for SqlTransactionManager {
    fn backend(&self) -> Backend {
        Backend::Sql
    }

    fn begin(&self) -> QuireResult<Box<dyn Transaction + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqlTransaction {
            conn,
            finished: false,
        }))
    }
}

/// A transaction against [`SqlTransactionManager`].
pub struct SqlTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

fn format_time(time: DateTime<Utc>) -> String {
    // Fixed-width UTC form sorts lexicographically in time order.
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> QuireResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| QuireError::corrupted(format!("bad timestamp '{}': {}", value, e)))
}

fn parse_opt_time(value: Option<String>) -> QuireResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

fn opt_time(value: Option<DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, |t| Value::Text(format_time(t)))
}

fn opt_json<T: serde::Serialize>(value: Option<&T>) -> QuireResult<Value> {
    Ok(match value {
        Some(v) => Value::Text(serde_json::to_string(v)?),
        None => Value::Null,
    })
}

fn phone_values(number: Option<&ContactPhoneNumber>) -> [Value; 2] {
    [
        opt_text(number.map(|n| n.phone_number.as_str())),
        opt_text(number.and_then(|n| n.extension.as_deref())),
    ]
}

/// Bind values for [`CONTACT_FIELDS`].
fn contact_values(base: &ContactBase) -> QuireResult<Vec<Value>> {
    let statuses: Vec<&StatusValue> = base.statuses().iter().collect();
    let mut values = vec![
        Value::Text(base.contact_id().to_string()),
        Value::Text(base.creation_registrar_id().to_string()),
        Value::Text(base.current_sponsor_registrar_id().to_string()),
        opt_time(base.creation_time()),
        opt_time(base.last_epp_update_time()),
        opt_text(base.last_epp_update_registrar_id()),
        opt_time(base.deletion_time()),
        Value::Text(serde_json::to_string(&statuses)?),
        opt_text(base.auth_info_password()),
        opt_text(base.email_address()),
        opt_json(base.localized_postal_info())?,
        opt_json(base.internationalized_postal_info())?,
    ];
    values.extend(phone_values(base.voice_number()));
    values.extend(phone_values(base.fax_number()));
    Ok(values)
}

/// Bind values for [`HISTORY_FIELDS`] followed by [`CONTACT_FIELDS`].
fn history_values(history: &ContactHistory) -> QuireResult<Vec<Value>> {
    let trid = history.trid();
    let mut values = vec![
        Value::Text(history.contact_repo_id().to_string()),
        Value::Integer(history.revision_id()),
        Value::Text(history.history_type().to_string()),
        Value::Text(format_time(history.modification_time())),
        Value::Text(history.registrar_id().to_string()),
        Value::Blob(history.xml_bytes().to_vec()),
        opt_text(trid.and_then(|t| t.client_transaction_id.as_deref())),
        opt_text(trid.map(|t| t.server_transaction_id.as_str())),
        Value::Integer(history.by_superuser() as i64),
        opt_text(history.reason()),
        Value::Integer(history.requested_by_registrar() as i64),
        Value::Integer(history.contact_base().is_some() as i64),
    ];
    match history.contact_base() {
        Some(base) => values.extend(contact_values(base)?),
        None => values.extend(std::iter::repeat(Value::Null).take(CONTACT_FIELD_COUNT)),
    }
    Ok(values)
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_phone(row: &Row<'_>, idx: usize) -> QuireResult<Option<ContactPhoneNumber>> {
    let number: Option<String> = row.get(idx)?;
    let extension: Option<String> = row.get(idx + 1)?;
    Ok(number.map(|phone_number| ContactPhoneNumber {
        phone_number,
        extension,
    }))
}

fn read_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> QuireResult<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text.as_deref().map(serde_json::from_str).transpose()?)
}

/// Rebuild a snapshot from [`CONTACT_FIELDS`] starting at column `offset`.
fn row_to_base(row: &Row<'_>, offset: usize, repo_id: String) -> QuireResult<ContactBase> {
    let col = |i: usize| offset + i;
    let statuses: Vec<StatusValue> = read_json(row, col(7))?.unwrap_or_default();
    let localized: Option<PostalInfo> = read_json(row, col(10))?;
    let internationalized: Option<PostalInfo> = read_json(row, col(11))?;

    let mut builder = ContactBase::builder()
        .set_repo_id(repo_id)
        .set_contact_id(row.get::<_, Option<String>>(col(0))?.unwrap_or_default())
        .set_creation_registrar_id(row.get::<_, Option<String>>(col(1))?.unwrap_or_default())
        .set_current_sponsor_registrar_id(
            row.get::<_, Option<String>>(col(2))?.unwrap_or_default(),
        )
        .set_last_epp_update_time(parse_opt_time(row.get(col(4))?)?)
        .set_last_epp_update_registrar_id(row.get(col(5))?)
        .set_deletion_time(parse_opt_time(row.get(col(6))?)?)
        .set_statuses(statuses)
        .set_auth_info_password(row.get(col(8))?)
        .set_email_address(row.get(col(9))?)
        .set_localized_postal_info(localized)
        .set_internationalized_postal_info(internationalized)
        .set_voice_number(read_phone(row, col(12))?)
        .set_fax_number(read_phone(row, col(14))?);
    if let Some(created) = parse_opt_time(row.get(col(3))?)? {
        builder = builder.set_creation_time(created);
    }
    builder
        .build_base()
        .map_err(|e| QuireError::corrupted(format!("stored contact is invalid: {}", e)))
}

fn row_to_contact(row: &Row<'_>) -> QuireResult<ContactResource> {
    let repo_id: String = row.get(0)?;
    let base = row_to_base(row, 1, repo_id)?;
    ContactResource::from_snapshot(&base)
}

fn row_to_history(row: &Row<'_>) -> QuireResult<ContactHistory> {
    let repo_id: String = row.get(0)?;
    let revision_id: i64 = row.get(1)?;
    let history_type: String = row.get(2)?;
    let modification_time: String = row.get(3)?;
    let registrar_id: String = row.get(4)?;
    let xml_bytes: Vec<u8> = row.get(5)?;
    let client_trid: Option<String> = row.get(6)?;
    let server_trid: Option<String> = row.get(7)?;
    let by_superuser: bool = row.get(8)?;
    let reason: Option<String> = row.get(9)?;
    let requested_by_registrar: bool = row.get(10)?;
    let has_snapshot: bool = row.get(11)?;

    let history_type: HistoryType = history_type
        .parse()
        .map_err(|_| QuireError::corrupted(format!("unknown history type '{}'", history_type)))?;

    let mut builder = ContactHistory::builder()
        .set_revision_id(revision_id)
        .set_type(history_type)
        .set_xml_bytes(xml_bytes)
        .set_modification_time(parse_time(&modification_time)?)
        .set_registrar_id(registrar_id)
        .set_by_superuser(by_superuser)
        .set_requested_by_registrar(requested_by_registrar)
        .set_contact_repo_id(repo_id.clone());
    if let Some(server_transaction_id) = server_trid {
        builder = builder.set_trid(Trid {
            client_transaction_id: client_trid,
            server_transaction_id,
        });
    }
    if let Some(reason) = reason {
        builder = builder.set_reason(reason);
    }
    if has_snapshot {
        builder = builder.set_contact(row_to_base(row, HISTORY_FIELD_COUNT, repo_id)?);
    }
    builder.build()
}

impl SqlTransaction<'_> {
    fn contact_exists(&self, repo_id: &str) -> QuireResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM contact WHERE repo_id = ?1", [repo_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn history_exists(&self, repo_id: &str, revision_id: i64) -> QuireResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM contact_history \
                 WHERE contact_repo_id = ?1 AND history_revision_id = ?2",
                rusqlite::params![repo_id, revision_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn write_contact(&self, contact: &ContactResource, verb: &str) -> QuireResult<()> {
        let mut values = vec![Value::Text(contact.repo_id().to_string())];
        values.extend(contact_values(contact.base())?);
        let sql = format!(
            "{} INTO contact (repo_id, {}) VALUES ({})",
            verb,
            CONTACT_FIELDS,
            placeholders(CONTACT_FIELD_COUNT + 1)
        );
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn write_history(&self, history: &ContactHistory, verb: &str) -> QuireResult<()> {
        let sql = format!(
            "{} INTO contact_history ({}, {}) VALUES ({})",
            verb,
            HISTORY_FIELDS,
            CONTACT_FIELDS,
            placeholders(HISTORY_FIELD_COUNT + CONTACT_FIELD_COUNT)
        );
        self.conn.execute(&sql, params_from_iter(history_values(history)?))?;
        Ok(())
    }

    fn write(&mut self, entity: Entity, replace: bool) -> QuireResult<()> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        match &entity {
            Entity::Contact(contact) => {
                if !replace && self.contact_exists(contact.repo_id())? {
                    return Err(QuireError::constraint(entity.to_string()));
                }
                self.write_contact(contact, verb)
            }
            Entity::ContactHistory(history) => {
                if !replace
                    && self.history_exists(history.contact_repo_id(), history.revision_id())?
                {
                    return Err(QuireError::constraint(entity.to_string()));
                }
                self.write_history(history, verb)
            }
        }
    }

    fn load_contact(&self, key: &SqlKey) -> QuireResult<Option<Entity>> {
        let SqlKey::Text(repo_id) = key else {
            return Err(QuireError::kind_mismatch(format!(
                "{} cannot be addressed by relational key {}",
                EntityKind::ContactResource,
                key
            )));
        };
        let sql = format!("SELECT repo_id, {} FROM contact WHERE repo_id = ?1", CONTACT_FIELDS);
        let contact = self
            .conn
            .query_row(&sql, [repo_id], |row| Ok(row_to_contact(row)))
            .optional()?
            .transpose()?;
        Ok(contact.map(Entity::Contact))
    }

    fn load_history(&self, key: &SqlKey) -> QuireResult<Option<Entity>> {
        let SqlKey::Revision {
            repo_id,
            revision_id,
        } = key
        else {
            return Err(QuireError::kind_mismatch(format!(
                "{} cannot be addressed by relational key {}",
                EntityKind::ContactHistory,
                key
            )));
        };
        let sql = format!(
            "SELECT {}, {} FROM contact_history \
             WHERE contact_repo_id = ?1 AND history_revision_id = ?2",
            HISTORY_FIELDS, CONTACT_FIELDS
        );
        let history = self
            .conn
            .query_row(&sql, rusqlite::params![repo_id, revision_id], |row| {
                Ok(row_to_history(row))
            })
            .optional()?
            .transpose()?;
        Ok(history.map(Entity::ContactHistory))
    }
}

impl Transaction for SqlTransaction<'_> {
    fn backend(&self) -> Backend {
        Backend::Sql
    }

    fn insert(&mut self, entity: Entity) -> QuireResult<()> {
        self.write(entity, false)
    }

    fn put(&mut self, entity: Entity) -> QuireResult<()> {
        self.write(entity, true)
    }

    fn load(&mut self, kind: EntityKind, key: &BackendKey) -> QuireResult<Entity> {
        let sql_key = key.to_sql_key(kind)?;
        for concrete in kind.concrete_kinds() {
            let found = match concrete {
                EntityKind::ContactResource => self.load_contact(&sql_key)?,
                EntityKind::ContactHistory => self.load_history(&sql_key)?,
                EntityKind::HistoryEntry => None,
            };
            if let Some(entity) = found {
                debug!(%kind, key = %sql_key, "Loaded entity");
                return Ok(entity);
            }
        }
        Err(QuireError::not_found(format!("{} {}", kind, sql_key)))
    }

    fn list_history(&mut self, repo_id: &str) -> QuireResult<Vec<HistoryEntry>> {
        let sql = format!(
            "SELECT {}, {} FROM contact_history WHERE contact_repo_id = ?1 \
             ORDER BY history_modification_time, history_revision_id",
            HISTORY_FIELDS, CONTACT_FIELDS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([repo_id], |row| Ok(row_to_history(row)))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(HistoryEntry::Contact(row??));
        }
        Ok(entries)
    }

    fn next_revision_id(&mut self, repo_id: &str) -> QuireResult<i64> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(history_revision_id), 0) + 1 FROM contact_history \
             WHERE contact_repo_id = ?1",
            [repo_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn commit(mut self: Box<Self>) -> QuireResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        debug!(backend = %Backend::Sql, "Committed transaction");
        Ok(())
    }
}

impl Drop for SqlTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "Rollback failed");
        } else {
            debug!(backend = %Backend::Sql, "Rolled back transaction");
        }
    }
}
