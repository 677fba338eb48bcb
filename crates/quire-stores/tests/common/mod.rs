//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use quire_core::contact::{
    ContactAddress, ContactPhoneNumber, ContactResource, PostalInfo, PostalInfoType, StatusValue,
};
use quire_core::history::{ContactHistory, ContactHistoryBuilder, HistoryType, Trid};
use quire_core::transaction::TransactionManager;
use quire_core::FakeClock;
use quire_stores::{KvTransactionManager, SqlTransactionManager};
use tracing_subscriber::EnvFilter;

/// Install a test log subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One fresh in-memory manager per backend.
pub fn managers() -> Vec<Box<dyn TransactionManager>> {
    vec![
        Box::new(KvTransactionManager::in_memory()),
        Box::new(SqlTransactionManager::in_memory().expect("in-memory database")),
    ]
}

pub fn clock() -> FakeClock {
    FakeClock::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
}

pub fn new_contact_with_email(contact_id: &str, repo_id: &str, email: &str) -> ContactResource {
    ContactResource::builder()
        .set_contact_id(contact_id)
        .set_repo_id(repo_id)
        .set_creation_registrar_id("TheRegistrar")
        .set_current_sponsor_registrar_id("TheRegistrar")
        .set_creation_time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        .set_email_address(Some(email.to_string()))
        .build()
        .expect("valid contact")
}

/// Contact with every privacy-sensitive field populated.
pub fn full_contact() -> ContactResource {
    let address = ContactAddress::builder()
        .street(["111 8th Ave", "4th Floor"])
        .city("New York")
        .state("NY")
        .zip("10011")
        .country_code("US")
        .build()
        .expect("valid address");
    ContactResource::builder()
        .set_repo_id("1-FOOBAR")
        .set_contact_id("contactId")
        .set_creation_registrar_id("TheRegistrar")
        .set_current_sponsor_registrar_id("TheRegistrar")
        .set_creation_time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        .add_status(StatusValue::ClientDeleteProhibited)
        .set_auth_info_password(Some("2fooBAR".to_string()))
        .set_localized_postal_info(Some(
            PostalInfo::new(PostalInfoType::Localized, address.clone())
                .with_name("John Doe")
                .with_org("GOOGLE INCORPORATED <script>"),
        ))
        .set_internationalized_postal_info(Some(
            PostalInfo::new(PostalInfoType::Internationalized, address).with_name("John Doe"),
        ))
        .set_voice_number(Some(ContactPhoneNumber::new("867-5309")))
        .set_fax_number(Some(ContactPhoneNumber::new("867-5309").with_extension("1000")))
        .set_email_address(Some("test@example.com".to_string()))
        .build()
        .expect("valid contact")
}

/// History builder for a creation of `contact`, snapshot included.
pub fn history_builder(contact: &ContactResource, clock: &FakeClock) -> ContactHistoryBuilder {
    use quire_core::Clock;
    ContactHistory::builder()
        .set_type(HistoryType::ContactCreate)
        .set_xml_bytes("<xml></xml>".as_bytes())
        .set_modification_time(clock.now())
        .set_registrar_id("TheRegistrar")
        .set_trid(Trid::create("ABC-123", "server-trid"))
        .set_by_superuser(false)
        .set_reason("reason")
        .set_requested_by_registrar(true)
        .set_contact(contact)
}
