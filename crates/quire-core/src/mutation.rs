//! Recording a contact mutation together with its history entry.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::contact::ContactResource;
use crate::error::{QuireError, QuireResult};
use crate::history::{observe_revision_id, ContactHistory, HistoryType, Trid};
use crate::transaction::{Transaction, TransactionManager, TransactionManagerExt};

/// Everything known about one inbound mutation of a contact.
///
/// `contact` is the record as the request left it; timestamps and the
/// acting registrar are stamped onto it when the mutation is recorded.
#[derive(Debug, Clone)]
pub struct MutationDescriptor {
    pub event_type: HistoryType,
    pub xml_bytes: Vec<u8>,
    pub registrar_id: String,
    pub trid: Option<Trid>,
    pub by_superuser: bool,
    pub reason: Option<String>,
    pub requested_by_registrar: bool,
    pub modification_time: DateTime<Utc>,
    pub contact: ContactResource,
}

impl MutationDescriptor {
    /// Post-mutation state of the contact.
    fn stamped_contact(&self) -> QuireResult<ContactResource> {
        let mut builder = self.contact.to_builder();
        let base = self.contact.base();

        if self.event_type.is_creation() {
            if base.creation_time().is_none() {
                builder = builder.set_creation_time(self.modification_time);
            }
            if base.creation_registrar_id().is_empty() {
                builder = builder.set_creation_registrar_id(self.registrar_id.clone());
            }
            if base.current_sponsor_registrar_id().is_empty() {
                builder = builder.set_current_sponsor_registrar_id(self.registrar_id.clone());
            }
        } else {
            builder = builder
                .set_last_epp_update_time(Some(self.modification_time))
                .set_last_epp_update_registrar_id(Some(self.registrar_id.clone()));
        }
        if self.event_type.is_deletion() {
            builder = builder.set_deletion_time(Some(self.modification_time));
        }

        builder.build()
    }
}

/// Write the mutated contact and exactly one history entry through `tx`.
///
/// Creations insert the contact and fail if it already exists; every other
/// event replaces it. The entry takes the next revision id stored for the
/// contact, and a generated server trid when the request carried none.
pub fn record_mutation_in(
    tx: &mut dyn Transaction,
    descriptor: &MutationDescriptor,
) -> QuireResult<ContactHistory> {
    if !descriptor.event_type.is_contact_event() {
        return Err(QuireError::validation(format!(
            "{} is not a contact event",
            descriptor.event_type
        )));
    }

    let contact = descriptor.stamped_contact()?;
    if descriptor.event_type.is_creation() {
        tx.insert(contact.clone().into())?;
    } else {
        tx.put(contact.clone().into())?;
    }

    let revision_id = tx.next_revision_id(contact.repo_id())?;
    observe_revision_id(revision_id);
    let trid = descriptor
        .trid
        .clone()
        .unwrap_or_else(|| Trid::generate(None));
    let mut builder = ContactHistory::builder()
        .set_revision_id(revision_id)
        .set_type(descriptor.event_type)
        .set_trid(trid)
        .set_xml_bytes(descriptor.xml_bytes.clone())
        .set_modification_time(descriptor.modification_time)
        .set_registrar_id(descriptor.registrar_id.clone())
        .set_by_superuser(descriptor.by_superuser)
        .set_requested_by_registrar(descriptor.requested_by_registrar)
        .set_contact(&contact);
    if let Some(reason) = &descriptor.reason {
        builder = builder.set_reason(reason.clone());
    }
    let history = builder.build()?;

    tx.insert(history.clone().into())?;
    debug!(
        backend = %tx.backend(),
        contact_repo_id = %history.contact_repo_id(),
        revision_id = history.revision_id(),
        history_type = %history.history_type(),
        "Recorded contact mutation"
    );
    Ok(history)
}

/// Record a mutation in its own transaction on `tm`.
pub fn record_mutation<M>(tm: &M, descriptor: &MutationDescriptor) -> QuireResult<ContactHistory>
where
    M: TransactionManager + ?Sized,
{
    tm.transact(|tx| record_mutation_in(tx, descriptor))
}
