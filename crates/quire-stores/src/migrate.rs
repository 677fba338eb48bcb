//! Replay of key-value history into the relational backend.

use tracing::{debug, info};

use quire_core::contact::ContactResource;
use quire_core::entity::Persistable;
use quire_core::error::{QuireError, QuireResult};
use quire_core::key::{BackendKey, EntityKind, SqlKey, VKey};
use quire_core::transaction::{Backend, TransactionManager, TransactionManagerExt};

/// Outcome of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries written to the relational backend.
    pub replayed: usize,
    /// Entries already present there.
    pub skipped: usize,
}

fn check_backends<K, S>(kv: &K, sql: &S) -> QuireResult<()>
where
    K: TransactionManager + ?Sized,
    S: TransactionManager + ?Sized,
{
    if kv.backend() != Backend::Kv || sql.backend() != Backend::Sql {
        return Err(QuireError::validation(format!(
            "replay reads from {} into {}, got {} into {}",
            Backend::Kv,
            Backend::Sql,
            kv.backend(),
            sql.backend()
        )));
    }
    Ok(())
}

/// Copy the key-value history of contact `repo_id` into the relational
/// backend.
///
/// Every entry missing relationally goes through the replay fixup and is
/// inserted; entries already present are skipped, so running the replay
/// again writes nothing. All inserts share one relational transaction: a
/// consistency failure on any entry leaves the relational backend unchanged.
pub fn replay_history_to_sql<K, S>(kv: &K, sql: &S, repo_id: &str) -> QuireResult<ReplayReport>
where
    K: TransactionManager + ?Sized,
    S: TransactionManager + ?Sized,
{
    check_backends(kv, sql)?;
    let entries = kv.list_history(repo_id)?;

    let report = sql.transact(|tx| {
        let mut report = ReplayReport::default();
        for entry in entries {
            let key = BackendKey::Sql(entry.sql_key());
            if tx.exists(EntityKind::HistoryEntry, &key)? {
                report.skipped += 1;
                continue;
            }
            let fixed = entry.before_sql_save_on_replay(tx)?;
            debug!(
                contact_repo_id = repo_id,
                revision_id = fixed.revision_id(),
                "Replaying history entry"
            );
            tx.insert(fixed.into())?;
            report.replayed += 1;
        }
        Ok(report)
    })?;

    info!(
        contact_repo_id = repo_id,
        replayed = report.replayed,
        skipped = report.skipped,
        "Replayed history into relational backend"
    );
    Ok(report)
}

/// Copy contact `repo_id` into the relational backend if it is missing
/// there, then replay its history.
pub fn migrate_contact<K, S>(kv: &K, sql: &S, repo_id: &str) -> QuireResult<ReplayReport>
where
    K: TransactionManager + ?Sized,
    S: TransactionManager + ?Sized,
{
    check_backends(kv, sql)?;
    let key: VKey<ContactResource> = VKey::from_sql(SqlKey::Text(repo_id.to_string()));
    let contact = kv.load_by_key(&key)?;
    if !sql.exists(&contact.create_vkey())? {
        sql.insert(&contact)?;
        debug!(contact_repo_id = repo_id, "Copied contact into relational backend");
    }
    replay_history_to_sql(kv, sql, repo_id)
}
