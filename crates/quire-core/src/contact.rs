//! Contact records: the mutable parent entity and its snapshot form.
//!
//! [`ContactBase`] holds every field of a contact. A [`ContactResource`] is
//! the live, mutable record as stored in a backend; history entries embed an
//! independent [`ContactBase`] copy taken at the instant of the mutation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::entity::{Entity, Persistable};
use crate::error::{QuireError, QuireResult};
use crate::key::{EntityKind, SqlKey, VKey};

/// Maximum number of street lines in a postal address.
pub const MAX_STREET_LINES: usize = 3;

/// EPP status values that may be set on a contact.
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
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum StatusValue {
    Ok,
    ClientDeleteProhibited,
    ClientTransferProhibited,
    ClientUpdateProhibited,
    Linked,
    PendingDelete,
    PendingTransfer,
    ServerDeleteProhibited,
    ServerTransferProhibited,
    ServerUpdateProhibited,
}

/// Whether a postal info block uses localized or internationalized (ASCII) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PostalInfoType {
    Localized,
    Internationalized,
}

/// A postal address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactAddress {
    pub street: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country_code: Option<String>,
}

impl ContactAddress {
    pub fn builder() -> ContactAddressBuilder {
        ContactAddressBuilder::default()
    }
}

/// Builder for [`ContactAddress`].
#[derive(Debug, Default)]
pub struct ContactAddressBuilder {
    address: ContactAddress,
}

impl ContactAddressBuilder {
    pub fn street<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.address.street = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn city(mut self, city: impl Into<String>) -> Self {
        self.address.city = Some(city.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.address.state = Some(state.into());
        self
    }

    pub fn zip(mut self, zip: impl Into<String>) -> Self {
        self.address.zip = Some(zip.into());
        self
    }

    pub fn country_code(mut self, code: impl Into<String>) -> Self {
        self.address.country_code = Some(code.into());
        self
    }

    pub fn build(self) -> QuireResult<ContactAddress> {
        if self.address.street.len() > MAX_STREET_LINES {
            return Err(QuireError::validation(format!(
                "Address has {} street lines, at most {} allowed",
                self.address.street.len(),
                MAX_STREET_LINES
            )));
        }
        if let Some(code) = &self.address.country_code {
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(QuireError::validation(format!(
                    "Country code '{}' is not a two-letter ISO 3166 code",
                    code
                )));
            }
        }
        Ok(self.address)
    }
}

/// Postal information block of a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalInfo {
    pub name: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "type")]
    pub info_type: PostalInfoType,
    pub address: ContactAddress,
}

impl PostalInfo {
    pub fn new(info_type: PostalInfoType, address: ContactAddress) -> Self {
        Self {
            name: None,
            org: None,
            info_type,
            address,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }
}

/// A voice or fax number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPhoneNumber {
    pub phone_number: String,
    pub extension: Option<String>,
}

impl ContactPhoneNumber {
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            extension: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }
}

/// All field values of a contact.
///
/// This is both the state of a live [`ContactResource`] and the snapshot
/// type embedded in history. Fields are only reachable through accessors;
/// a changed value is made with [`ContactBase::to_builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactBase {
    pub(crate) repo_id: String,
    pub(crate) contact_id: String,
    pub(crate) creation_registrar_id: String,
    pub(crate) current_sponsor_registrar_id: String,
    pub(crate) creation_time: Option<DateTime<Utc>>,
    pub(crate) last_epp_update_time: Option<DateTime<Utc>>,
    pub(crate) last_epp_update_registrar_id: Option<String>,
    pub(crate) deletion_time: Option<DateTime<Utc>>,
    pub(crate) statuses: BTreeSet<StatusValue>,
    pub(crate) auth_info_password: Option<String>,
    pub(crate) email_address: Option<String>,
    pub(crate) localized_postal_info: Option<PostalInfo>,
    pub(crate) internationalized_postal_info: Option<PostalInfo>,
    pub(crate) voice_number: Option<ContactPhoneNumber>,
    pub(crate) fax_number: Option<ContactPhoneNumber>,
}

impl ContactBase {
    pub fn builder() -> ContactBuilder {
        ContactBuilder::default()
    }

    pub fn to_builder(&self) -> ContactBuilder {
        ContactBuilder {
            base: self.clone(),
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    pub fn creation_registrar_id(&self) -> &str {
        &self.creation_registrar_id
    }

    pub fn current_sponsor_registrar_id(&self) -> &str {
        &self.current_sponsor_registrar_id
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    pub fn last_epp_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_epp_update_time
    }

    pub fn last_epp_update_registrar_id(&self) -> Option<&str> {
        self.last_epp_update_registrar_id.as_deref()
    }

    pub fn deletion_time(&self) -> Option<DateTime<Utc>> {
        self.deletion_time
    }

    pub fn statuses(&self) -> &BTreeSet<StatusValue> {
        &self.statuses
    }

    pub fn auth_info_password(&self) -> Option<&str> {
        self.auth_info_password.as_deref()
    }

    pub fn email_address(&self) -> Option<&str> {
        self.email_address.as_deref()
    }

    pub fn localized_postal_info(&self) -> Option<&PostalInfo> {
        self.localized_postal_info.as_ref()
    }

    pub fn internationalized_postal_info(&self) -> Option<&PostalInfo> {
        self.internationalized_postal_info.as_ref()
    }

    pub fn voice_number(&self) -> Option<&ContactPhoneNumber> {
        self.voice_number.as_ref()
    }

    pub fn fax_number(&self) -> Option<&ContactPhoneNumber> {
        self.fax_number.as_ref()
    }

    /// Whether the contact was deleted at or before `now`.
    pub fn is_deleted_at(&self, now: DateTime<Utc>) -> bool {
        self.deletion_time.map_or(false, |t| t <= now)
    }

    /// Copy with every privacy-sensitive field erased.
    pub fn wipe_out_pii(&self) -> ContactBase {
        crate::redaction::wipe_out_pii(self)
    }
}

impl AsRef<ContactBase> for ContactBase {
    fn as_ref(&self) -> &ContactBase {
        self
    }
}

/// Builder for [`ContactBase`] and [`ContactResource`].
#[derive(Debug, Clone)]
pub struct ContactBuilder {
    base: ContactBase,
}

impl Default for ContactBuilder {
    fn default() -> Self {
        Self {
            base: ContactBase {
                repo_id: String::new(),
                contact_id: String::new(),
                creation_registrar_id: String::new(),
                current_sponsor_registrar_id: String::new(),
                creation_time: None,
                last_epp_update_time: None,
                last_epp_update_registrar_id: None,
                deletion_time: None,
                statuses: BTreeSet::new(),
                auth_info_password: None,
                email_address: None,
                localized_postal_info: None,
                internationalized_postal_info: None,
                voice_number: None,
                fax_number: None,
            },
        }
    }
}

impl ContactBuilder {
    pub fn set_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.base.repo_id = repo_id.into();
        self
    }

    pub fn set_contact_id(mut self, contact_id: impl Into<String>) -> Self {
        self.base.contact_id = contact_id.into();
        self
    }

    pub fn set_creation_registrar_id(mut self, registrar_id: impl Into<String>) -> Self {
        self.base.creation_registrar_id = registrar_id.into();
        self
    }

    pub fn set_current_sponsor_registrar_id(mut self, registrar_id: impl Into<String>) -> Self {
        self.base.current_sponsor_registrar_id = registrar_id.into();
        self
    }

    pub fn set_creation_time(mut self, time: DateTime<Utc>) -> Self {
        self.base.creation_time = Some(time);
        self
    }

    pub fn set_last_epp_update_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.base.last_epp_update_time = time;
        self
    }

    pub fn set_last_epp_update_registrar_id(mut self, registrar_id: Option<String>) -> Self {
        self.base.last_epp_update_registrar_id = registrar_id;
        self
    }

    pub fn set_deletion_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.base.deletion_time = time;
        self
    }

    pub fn set_statuses<I: IntoIterator<Item = StatusValue>>(mut self, statuses: I) -> Self {
        self.base.statuses = statuses.into_iter().collect();
        self
    }

    pub fn add_status(mut self, status: StatusValue) -> Self {
        self.base.statuses.insert(status);
        self
    }

    pub fn set_auth_info_password(mut self, password: Option<String>) -> Self {
        self.base.auth_info_password = password;
        self
    }

    pub fn set_email_address(mut self, email: Option<String>) -> Self {
        self.base.email_address = email;
        self
    }

    pub fn set_localized_postal_info(mut self, info: Option<PostalInfo>) -> Self {
        self.base.localized_postal_info = info;
        self
    }

    pub fn set_internationalized_postal_info(mut self, info: Option<PostalInfo>) -> Self {
        self.base.internationalized_postal_info = info;
        self
    }

    pub fn set_voice_number(mut self, number: Option<ContactPhoneNumber>) -> Self {
        self.base.voice_number = number;
        self
    }

    pub fn set_fax_number(mut self, number: Option<ContactPhoneNumber>) -> Self {
        self.base.fax_number = number;
        self
    }

    /// Erase the privacy-sensitive fields.
    pub fn wipe_out_pii(mut self) -> Self {
        self.base = crate::redaction::wipe_out_pii(&self.base);
        self
    }

    fn validate_postal_info(&self) -> QuireResult<()> {
        let checks = [
            (&self.base.localized_postal_info, PostalInfoType::Localized),
            (
                &self.base.internationalized_postal_info,
                PostalInfoType::Internationalized,
            ),
        ];
        for (info, expected) in checks {
            if let Some(info) = info {
                if info.info_type != expected {
                    return Err(QuireError::validation(format!(
                        "Postal info of type {} set in the {} slot",
                        info.info_type, expected
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build a snapshot-form value. The repository id may be empty.
    pub fn build_base(self) -> QuireResult<ContactBase> {
        self.validate_postal_info()?;
        Ok(self.base)
    }

    /// Build a live record. The repository id is required.
    pub fn build(self) -> QuireResult<ContactResource> {
        if self.base.repo_id.is_empty() {
            return Err(QuireError::missing_field("repo_id"));
        }
        Ok(ContactResource {
            base: self.build_base()?,
        })
    }
}

/// The live, mutable parent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactResource {
    base: ContactBase,
}

impl ContactResource {
    pub fn builder() -> ContactBuilder {
        ContactBuilder::default()
    }

    pub fn to_builder(&self) -> ContactBuilder {
        self.base.to_builder()
    }

    pub fn repo_id(&self) -> &str {
        &self.base.repo_id
    }

    pub fn base(&self) -> &ContactBase {
        &self.base
    }

    /// Deep, independent copy of the current field values.
    pub fn capture_snapshot(&self) -> ContactBase {
        self.base.clone()
    }

    /// Rebuild a live record from snapshot values.
    pub fn from_snapshot(snapshot: &ContactBase) -> QuireResult<Self> {
        snapshot.to_builder().build()
    }
}

impl AsRef<ContactBase> for ContactResource {
    fn as_ref(&self) -> &ContactBase {
        &self.base
    }
}

impl From<ContactResource> for Entity {
    fn from(contact: ContactResource) -> Self {
        Entity::Contact(contact)
    }
}

impl TryFrom<Entity> for ContactResource {
    type Error = QuireError;

    fn try_from(entity: Entity) -> QuireResult<Self> {
        match entity {
            Entity::Contact(contact) => Ok(contact),
            other => Err(QuireError::kind_mismatch(format!(
                "expected {}, found {}",
                EntityKind::ContactResource,
                other.kind()
            ))),
        }
    }
}

impl Persistable for ContactResource {
    const KIND: EntityKind = EntityKind::ContactResource;

    fn sql_key(&self) -> SqlKey {
        SqlKey::Text(self.base.repo_id.clone())
    }
}

impl ContactResource {
    pub fn create_vkey(&self) -> VKey<ContactResource> {
        VKey::from_sql(self.sql_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn address() -> ContactAddress {
        ContactAddress::builder()
            .street(["111 8th Ave", "4th Floor"])
            .city("New York")
            .state("NY")
            .zip("10011")
            .country_code("US")
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_repo_id() {
        let err = ContactResource::builder()
            .set_contact_id("contactId")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValMissingField);

        let base = ContactBase::builder().set_contact_id("contactId").build_base().unwrap();
        assert_eq!(base.repo_id(), "");
    }

    #[test]
    fn test_address_validation() {
        assert!(ContactAddress::builder()
            .street(["1", "2", "3", "4"])
            .build()
            .is_err());
        assert!(ContactAddress::builder().country_code("usa").build().is_err());
        assert_eq!(address().street.len(), 2);
    }

    #[test]
    fn test_postal_info_slot_validation() {
        let err = ContactResource::builder()
            .set_repo_id("1-FOOBAR")
            .set_localized_postal_info(Some(PostalInfo::new(
                PostalInfoType::Internationalized,
                address(),
            )))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("localized"));
    }

    #[test]
    fn test_to_builder_yields_new_value() {
        let original = ContactResource::builder()
            .set_repo_id("contact1")
            .set_contact_id("contactId")
            .set_email_address(Some("a@example.com".to_string()))
            .build()
            .unwrap();
        let changed = original
            .to_builder()
            .set_email_address(Some("b@example.com".to_string()))
            .build()
            .unwrap();

        assert_eq!(original.base().email_address(), Some("a@example.com"));
        assert_eq!(changed.base().email_address(), Some("b@example.com"));
        assert_eq!(changed.repo_id(), original.repo_id());
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let contact = ContactResource::builder()
            .set_repo_id("contact1")
            .set_localized_postal_info(Some(PostalInfo::new(PostalInfoType::Localized, address())))
            .build()
            .unwrap();
        let snapshot = contact.capture_snapshot();
        let mutated = contact.to_builder().set_localized_postal_info(None).build().unwrap();

        assert!(snapshot.localized_postal_info().is_some());
        assert!(mutated.base().localized_postal_info().is_none());
        assert_eq!(&snapshot, contact.base());
    }

    #[test]
    fn test_deletion() {
        let deleted_at = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let contact = ContactResource::builder()
            .set_repo_id("contact1")
            .set_deletion_time(Some(deleted_at))
            .build()
            .unwrap();
        assert!(contact.base().is_deleted_at(deleted_at));
        assert!(!contact.base().is_deleted_at(deleted_at - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_status_value_names() {
        assert_eq!(StatusValue::ClientDeleteProhibited.to_string(), "clientDeleteProhibited");
        assert_eq!(
            "pendingTransfer".parse::<StatusValue>().unwrap(),
            StatusValue::PendingTransfer
        );
    }
}
