//! The closed set of persistable entities.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::contact::ContactResource;
use crate::error::{QuireError, QuireResult};
use crate::history::ContactHistory;
use crate::key::{EntityKind, KvKey, SqlKey};

/// A typed entity the transaction managers can store.
///
/// `KIND` may be abstract (see [`EntityKind::is_concrete`]); loading an
/// abstract kind returns whichever concrete subtype is stored under the key.
pub trait Persistable:
    Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Into<Entity>
    + TryFrom<Entity, Error = QuireError>
    + Send
    + Sync
    + 'static
{
    const KIND: EntityKind;

    /// Relational primary key derived from the entity's own identity fields.
    fn sql_key(&self) -> SqlKey;
}

/// Any stored entity, as handed to and returned from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Contact(ContactResource),
    ContactHistory(ContactHistory),
}

impl Entity {
    /// Concrete kind of the wrapped value.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Contact(_) => EntityKind::ContactResource,
            Entity::ContactHistory(_) => EntityKind::ContactHistory,
        }
    }

    pub fn sql_key(&self) -> SqlKey {
        match self {
            Entity::Contact(contact) => contact.sql_key(),
            Entity::ContactHistory(history) => history.sql_key(),
        }
    }

    /// Key-value key in the kind's storage category.
    pub fn kv_key(&self) -> QuireResult<KvKey> {
        self.kind().kv_key_for(&self.sql_key())
    }

    /// Serialize the wrapped value for storage.
    pub fn to_json(&self) -> QuireResult<serde_json::Value> {
        let value = match self {
            Entity::Contact(contact) => serde_json::to_value(contact)?,
            Entity::ContactHistory(history) => serde_json::to_value(history)?,
        };
        Ok(value)
    }

    /// Rebuild an entity stored with discriminator `kind`.
    pub fn from_json(kind: EntityKind, value: serde_json::Value) -> QuireResult<Self> {
        match kind {
            EntityKind::ContactResource => Ok(Entity::Contact(serde_json::from_value(value)?)),
            EntityKind::ContactHistory => {
                Ok(Entity::ContactHistory(serde_json::from_value(value)?))
            }
            EntityKind::HistoryEntry => Err(QuireError::corrupted(
                "stored entity carries an abstract kind discriminator",
            )),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.sql_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactResource;

    #[test]
    fn test_json_round_trip_keeps_kind() {
        let contact = ContactResource::builder()
            .set_repo_id("contact1")
            .set_contact_id("contactId")
            .build()
            .unwrap();
        let entity = Entity::from(contact.clone());
        let value = entity.to_json().unwrap();
        let back = Entity::from_json(entity.kind(), value).unwrap();
        assert_eq!(back, entity);
        assert_eq!(ContactResource::try_from(back).unwrap(), contact);
    }

    #[test]
    fn test_abstract_discriminator_rejected() {
        let err = Entity::from_json(EntityKind::HistoryEntry, serde_json::json!({})).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DbCorrupted);
    }

    #[test]
    fn test_display_names_kind_and_key() {
        let contact = ContactResource::builder().set_repo_id("c1").build().unwrap();
        assert_eq!(Entity::from(contact).to_string(), "ContactResource('c1')");
    }
}
