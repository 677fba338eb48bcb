//! History entries: immutable audit records of parent-record mutations.
//!
//! A [`ContactHistory`] is written in the same transaction as the contact
//! mutation it describes. It always names its parent through
//! `contact_repo_id` and may additionally embed a [`ContactBase`] snapshot of
//! the contact as it was after the mutation. Entries written before
//! snapshotting existed carry no snapshot.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::contact::{ContactBase, ContactResource};
use crate::entity::{Entity, Persistable};
use crate::error::{QuireError, QuireResult};
use crate::key::{EntityKind, SqlKey, VKey};

static NEXT_REVISION_ID: Lazy<AtomicI64> =
    Lazy::new(|| AtomicI64::new(Utc::now().timestamp_micros()));

/// Allocate a revision id for an entry built without one.
///
/// Ids start from the wall clock in microseconds, so a restarted process does
/// not hand out ids an earlier run already stored. Mutations recorded through
/// a transaction take their id from the backend instead.
pub fn allocate_revision_id() -> i64 {
    NEXT_REVISION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Keep later allocations past an id a backend handed out.
pub(crate) fn observe_revision_id(revision_id: i64) {
    NEXT_REVISION_ID.fetch_max(revision_id + 1, Ordering::Relaxed);
}

/// Event that produced a history entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryType {
    ContactCreate,
    ContactDelete,
    ContactDeleteFailure,
    ContactPendingDelete,
    ContactTransferApprove,
    ContactTransferCancel,
    ContactTransferReject,
    ContactTransferRequest,
    ContactUpdate,
    DomainCreate,
    DomainDelete,
    DomainUpdate,
    HostCreate,
    HostDelete,
    HostUpdate,
    /// Written by the system rather than in response to a request.
    Synthetic,
}

impl HistoryType {
    /// Whether the event concerns a contact.
    pub fn is_contact_event(&self) -> bool {
        matches!(
            self,
            Self::ContactCreate
                | Self::ContactDelete
                | Self::ContactDeleteFailure
                | Self::ContactPendingDelete
                | Self::ContactTransferApprove
                | Self::ContactTransferCancel
                | Self::ContactTransferReject
                | Self::ContactTransferRequest
                | Self::ContactUpdate
        )
    }

    /// Whether the event creates its parent record.
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            Self::ContactCreate | Self::DomainCreate | Self::HostCreate
        )
    }

    /// Whether the event deletes its parent record.
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            Self::ContactDelete | Self::DomainDelete | Self::HostDelete
        )
    }
}

/// Client and server transaction identifiers of the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trid {
    pub client_transaction_id: Option<String>,
    pub server_transaction_id: String,
}

impl Trid {
    pub fn create(
        client_transaction_id: impl Into<String>,
        server_transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            client_transaction_id: Some(client_transaction_id.into()),
            server_transaction_id: server_transaction_id.into(),
        }
    }

    /// Pair `client_transaction_id` with a freshly generated server id.
    pub fn generate(client_transaction_id: Option<String>) -> Self {
        Self {
            client_transaction_id,
            server_transaction_id: format!("srv-{}", Uuid::new_v4().simple()),
        }
    }
}

/// History of a contact mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactHistory {
    revision_id: i64,
    #[serde(rename = "type")]
    history_type: HistoryType,
    xml_bytes: Vec<u8>,
    modification_time: DateTime<Utc>,
    registrar_id: String,
    trid: Option<Trid>,
    by_superuser: bool,
    reason: Option<String>,
    requested_by_registrar: bool,
    contact_repo_id: String,
    contact_base: Option<ContactBase>,
}

impl ContactHistory {
    pub fn builder() -> ContactHistoryBuilder {
        ContactHistoryBuilder::default()
    }

    /// Builder preloaded with this entry's values, including its revision id.
    pub fn to_builder(&self) -> ContactHistoryBuilder {
        ContactHistoryBuilder {
            revision_id: Some(self.revision_id),
            history_type: Some(self.history_type),
            xml_bytes: self.xml_bytes.clone(),
            modification_time: Some(self.modification_time),
            registrar_id: Some(self.registrar_id.clone()),
            trid: self.trid.clone(),
            by_superuser: self.by_superuser,
            reason: self.reason.clone(),
            requested_by_registrar: self.requested_by_registrar,
            contact_repo_id: Some(self.contact_repo_id.clone()),
            contact_base: self.contact_base.clone(),
        }
    }

    pub fn revision_id(&self) -> i64 {
        self.revision_id
    }

    pub fn history_type(&self) -> HistoryType {
        self.history_type
    }

    pub fn xml_bytes(&self) -> &[u8] {
        &self.xml_bytes
    }

    pub fn modification_time(&self) -> DateTime<Utc> {
        self.modification_time
    }

    pub fn registrar_id(&self) -> &str {
        &self.registrar_id
    }

    pub fn trid(&self) -> Option<&Trid> {
        self.trid.as_ref()
    }

    pub fn by_superuser(&self) -> bool {
        self.by_superuser
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn requested_by_registrar(&self) -> bool {
        self.requested_by_registrar
    }

    /// Repository id of the parent contact.
    pub fn contact_repo_id(&self) -> &str {
        &self.contact_repo_id
    }

    /// Embedded snapshot, if one was captured.
    pub fn contact_base(&self) -> Option<&ContactBase> {
        self.contact_base.as_ref()
    }

    pub fn create_vkey(&self) -> VKey<ContactHistory> {
        VKey::from_sql(self.sql_key())
    }

    pub fn parent_vkey(&self) -> VKey<ContactResource> {
        VKey::from_sql(SqlKey::Text(self.contact_repo_id.clone()))
    }

    /// View this entry through its abstract supertype.
    pub fn as_history_entry(&self) -> HistoryEntry {
        HistoryEntry::Contact(self.clone())
    }
}

/// Builder for [`ContactHistory`].
#[derive(Debug, Clone, Default)]
pub struct ContactHistoryBuilder {
    revision_id: Option<i64>,
    history_type: Option<HistoryType>,
    xml_bytes: Vec<u8>,
    modification_time: Option<DateTime<Utc>>,
    registrar_id: Option<String>,
    trid: Option<Trid>,
    by_superuser: bool,
    reason: Option<String>,
    requested_by_registrar: bool,
    contact_repo_id: Option<String>,
    contact_base: Option<ContactBase>,
}

impl ContactHistoryBuilder {
    pub fn set_revision_id(mut self, revision_id: i64) -> Self {
        self.revision_id = Some(revision_id);
        self
    }

    pub fn set_type(mut self, history_type: HistoryType) -> Self {
        self.history_type = Some(history_type);
        self
    }

    pub fn set_xml_bytes(mut self, xml_bytes: impl Into<Vec<u8>>) -> Self {
        self.xml_bytes = xml_bytes.into();
        self
    }

    pub fn set_modification_time(mut self, time: DateTime<Utc>) -> Self {
        self.modification_time = Some(time);
        self
    }

    pub fn set_registrar_id(mut self, registrar_id: impl Into<String>) -> Self {
        self.registrar_id = Some(registrar_id.into());
        self
    }

    pub fn set_trid(mut self, trid: Trid) -> Self {
        self.trid = Some(trid);
        self
    }

    pub fn set_by_superuser(mut self, by_superuser: bool) -> Self {
        self.by_superuser = by_superuser;
        self
    }

    pub fn set_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn set_requested_by_registrar(mut self, requested: bool) -> Self {
        self.requested_by_registrar = requested;
        self
    }

    pub fn set_contact_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.contact_repo_id = Some(repo_id.into());
        self
    }

    /// Capture a snapshot of `contact`.
    ///
    /// The parent reference defaults to the contact's repository id when it
    /// has not been set explicitly.
    pub fn set_contact(mut self, contact: impl AsRef<ContactBase>) -> Self {
        let snapshot = contact.as_ref().clone();
        if self.contact_repo_id.is_none() && !snapshot.repo_id().is_empty() {
            self.contact_repo_id = Some(snapshot.repo_id().to_string());
        }
        self.contact_base = Some(snapshot);
        self
    }

    /// Drop the snapshot, as for entries written before snapshots existed.
    pub fn clear_contact(mut self) -> Self {
        self.contact_base = None;
        self
    }

    /// Erase personal data from the snapshot, if there is one.
    pub fn wipe_out_pii(mut self) -> Self {
        self.contact_base = self.contact_base.map(|base| base.wipe_out_pii());
        self
    }

    pub fn build(self) -> QuireResult<ContactHistory> {
        let history_type = self.history_type.ok_or_else(|| QuireError::missing_field("type"))?;
        let modification_time = self
            .modification_time
            .ok_or_else(|| QuireError::missing_field("modification_time"))?;
        let registrar_id = self
            .registrar_id
            .ok_or_else(|| QuireError::missing_field("registrar_id"))?;
        let contact_repo_id = self
            .contact_repo_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| QuireError::missing_field("contact_repo_id"))?;

        Ok(ContactHistory {
            revision_id: self.revision_id.unwrap_or_else(allocate_revision_id),
            history_type,
            xml_bytes: self.xml_bytes,
            modification_time,
            registrar_id,
            trid: self.trid,
            by_superuser: self.by_superuser,
            reason: self.reason,
            requested_by_registrar: self.requested_by_registrar,
            contact_repo_id,
            contact_base: self.contact_base,
        })
    }
}

impl From<ContactHistory> for Entity {
    fn from(history: ContactHistory) -> Self {
        Entity::ContactHistory(history)
    }
}

impl TryFrom<Entity> for ContactHistory {
    type Error = QuireError;

    fn try_from(entity: Entity) -> QuireResult<Self> {
        match entity {
            Entity::ContactHistory(history) => Ok(history),
            other => Err(QuireError::kind_mismatch(format!(
                "expected {}, found {}",
                EntityKind::ContactHistory,
                other.kind()
            ))),
        }
    }
}

impl Persistable for ContactHistory {
    const KIND: EntityKind = EntityKind::ContactHistory;

    fn sql_key(&self) -> SqlKey {
        SqlKey::Revision {
            repo_id: self.contact_repo_id.clone(),
            revision_id: self.revision_id,
        }
    }
}

/// Any history entry, whatever the kind of its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discriminator")]
pub enum HistoryEntry {
    #[serde(rename = "ContactHistory")]
    Contact(ContactHistory),
}

impl HistoryEntry {
    pub fn revision_id(&self) -> i64 {
        match self {
            HistoryEntry::Contact(h) => h.revision_id(),
        }
    }

    pub fn history_type(&self) -> HistoryType {
        match self {
            HistoryEntry::Contact(h) => h.history_type(),
        }
    }

    pub fn modification_time(&self) -> DateTime<Utc> {
        match self {
            HistoryEntry::Contact(h) => h.modification_time(),
        }
    }

    pub fn registrar_id(&self) -> &str {
        match self {
            HistoryEntry::Contact(h) => h.registrar_id(),
        }
    }

    /// Repository id of the parent record.
    pub fn parent_repo_id(&self) -> &str {
        match self {
            HistoryEntry::Contact(h) => h.contact_repo_id(),
        }
    }

    pub fn as_contact_history(&self) -> Option<&ContactHistory> {
        match self {
            HistoryEntry::Contact(h) => Some(h),
        }
    }
}

impl From<ContactHistory> for HistoryEntry {
    fn from(history: ContactHistory) -> Self {
        HistoryEntry::Contact(history)
    }
}

impl PartialEq<HistoryEntry> for ContactHistory {
    fn eq(&self, other: &HistoryEntry) -> bool {
        other.as_contact_history() == Some(self)
    }
}

impl From<HistoryEntry> for Entity {
    fn from(entry: HistoryEntry) -> Self {
        match entry {
            HistoryEntry::Contact(h) => Entity::ContactHistory(h),
        }
    }
}

impl TryFrom<Entity> for HistoryEntry {
    type Error = QuireError;

    fn try_from(entity: Entity) -> QuireResult<Self> {
        match entity {
            Entity::ContactHistory(h) => Ok(HistoryEntry::Contact(h)),
            other => Err(QuireError::kind_mismatch(format!(
                "expected {}, found {}",
                EntityKind::HistoryEntry,
                other.kind()
            ))),
        }
    }
}

impl Persistable for HistoryEntry {
    const KIND: EntityKind = EntityKind::HistoryEntry;

    fn sql_key(&self) -> SqlKey {
        match self {
            HistoryEntry::Contact(h) => h.sql_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::TimeZone;

    fn contact() -> ContactResource {
        ContactResource::builder()
            .set_repo_id("contact1")
            .set_contact_id("contactId")
            .set_email_address(Some("jd@example.com".to_string()))
            .build()
            .unwrap()
    }

    fn history_builder() -> ContactHistoryBuilder {
        ContactHistory::builder()
            .set_type(HistoryType::ContactCreate)
            .set_xml_bytes("<xml></xml>".as_bytes())
            .set_modification_time(Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap())
            .set_registrar_id("TheRegistrar")
            .set_trid(Trid::create("ABC-123", "server-trid"))
            .set_by_superuser(false)
            .set_reason("reason")
            .set_requested_by_registrar(true)
    }

    #[test]
    fn test_allocated_ids_skip_past_observed_ids() {
        let observed = allocate_revision_id() + 1_000;
        observe_revision_id(observed);
        assert!(allocate_revision_id() > observed);
        assert!(allocate_revision_id() > Utc::now().timestamp_micros() - 60_000_000);
    }

    #[test]
    fn test_set_contact_defaults_parent_reference() {
        let history = history_builder().set_contact(&contact()).build().unwrap();
        assert_eq!(history.contact_repo_id(), "contact1");
        assert_eq!(history.contact_base(), Some(contact().base()));
    }

    #[test]
    fn test_parent_reference_required_without_snapshot() {
        let err = history_builder().build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValMissingField);
        assert!(err.to_string().contains("contact_repo_id"));

        let legacy = history_builder().set_contact_repo_id("contact1").build().unwrap();
        assert!(legacy.contact_base().is_none());
        assert_eq!(legacy.parent_vkey().to_sql_key().unwrap(), SqlKey::Text("contact1".into()));
    }

    #[test]
    fn test_explicit_parent_reference_wins() {
        let history = history_builder()
            .set_contact_repo_id("contact1")
            .set_contact(&contact().to_builder().set_repo_id("other").build().unwrap())
            .build()
            .unwrap();
        assert_eq!(history.contact_repo_id(), "contact1");
        assert_eq!(history.contact_base().unwrap().repo_id(), "other");
    }

    #[test]
    fn test_to_builder_returns_new_value() {
        let original = history_builder().set_contact(&contact()).build().unwrap();
        let legacy = original.to_builder().clear_contact().build().unwrap();

        assert!(original.contact_base().is_some());
        assert!(legacy.contact_base().is_none());
        assert_eq!(legacy.revision_id(), original.revision_id());
        assert_eq!(legacy.contact_repo_id(), original.contact_repo_id());
    }

    #[test]
    fn test_revision_ids_are_unique() {
        let a = history_builder().set_contact(&contact()).build().unwrap();
        let b = history_builder().set_contact(&contact()).build().unwrap();
        assert_ne!(a.revision_id(), b.revision_id());
        assert_ne!(a.create_vkey(), b.create_vkey());
    }

    #[test]
    fn test_wipe_out_pii_without_snapshot_is_noop() {
        let legacy = history_builder().set_contact_repo_id("contact1").build().unwrap();
        let wiped = legacy.to_builder().wipe_out_pii().build().unwrap();
        assert_eq!(wiped, legacy);
    }

    #[test]
    fn test_serialize_round_trip() {
        let history = history_builder().set_contact(&contact()).build().unwrap();
        let json = serde_json::to_string(&history).unwrap();
        let back: ContactHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);

        let entry = history.as_history_entry();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"discriminator\":\"ContactHistory\""));
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(history, back);
    }

    #[test]
    fn test_flags_are_independent() {
        let combinations = [(false, false), (false, true), (true, false), (true, true)];
        for (by_superuser, requested) in combinations {
            let history = history_builder()
                .set_contact_repo_id("contact1")
                .set_by_superuser(by_superuser)
                .set_requested_by_registrar(requested)
                .build()
                .unwrap();
            assert_eq!(history.by_superuser(), by_superuser);
            assert_eq!(history.requested_by_registrar(), requested);
        }
    }

    #[test]
    fn test_history_type_names() {
        assert_eq!(HistoryType::ContactCreate.to_string(), "CONTACT_CREATE");
        assert_eq!("HOST_UPDATE".parse::<HistoryType>().unwrap(), HistoryType::HostUpdate);
        assert!(HistoryType::ContactCreate.is_creation());
        assert!(HistoryType::ContactDelete.is_deletion());
        assert!(!HistoryType::ContactUpdate.is_creation());
        assert!(HistoryType::ContactTransferRequest.is_contact_event());
        assert!(!HistoryType::DomainCreate.is_contact_event());
    }

    #[test]
    fn test_generated_trid_has_server_id() {
        let trid = Trid::generate(Some("client-1".to_string()));
        assert!(trid.server_transaction_id.starts_with("srv-"));
        assert_eq!(trid.client_transaction_id.as_deref(), Some("client-1"));
    }
}
