//! Redaction of personal data from contact snapshots.
//!
//! Erasure is field-level: a wiped field becomes `None` inside a snapshot
//! that is still present. A history entry whose snapshot was never captured
//! carries no snapshot at all and is left untouched.

use crate::contact::ContactBase;

/// Names of the fields [`wipe_out_pii`] erases, as they appear when a
/// snapshot is serialized.
pub const PII_FIELDS: [&str; 5] = [
    "email_address",
    "localized_postal_info",
    "internationalized_postal_info",
    "voice_number",
    "fax_number",
];

/// Copy of `snapshot` with the email address, both postal info blocks, and
/// the voice and fax numbers erased. Every other field is copied unchanged.
///
/// Pure and idempotent.
pub fn wipe_out_pii(snapshot: &ContactBase) -> ContactBase {
    ContactBase {
        email_address: None,
        localized_postal_info: None,
        internationalized_postal_info: None,
        voice_number: None,
        fax_number: None,
        ..snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::differing_fields;
    use crate::contact::{
        ContactAddress, ContactPhoneNumber, ContactResource, PostalInfo, PostalInfoType,
        StatusValue,
    };
    use chrono::{TimeZone, Utc};

    fn full_contact() -> ContactResource {
        let address = ContactAddress::builder()
            .street(["111 8th Ave", "4th Floor"])
            .city("New York")
            .state("NY")
            .zip("10011")
            .country_code("US")
            .build()
            .unwrap();
        ContactResource::builder()
            .set_repo_id("1-FOOBAR")
            .set_contact_id("contactId")
            .set_creation_registrar_id("TheRegistrar")
            .set_current_sponsor_registrar_id("TheRegistrar")
            .set_creation_time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
            .add_status(StatusValue::ClientDeleteProhibited)
            .set_auth_info_password(Some("2fooBAR".to_string()))
            .set_localized_postal_info(Some(PostalInfo::new(
                PostalInfoType::Localized,
                address.clone(),
            )))
            .set_internationalized_postal_info(Some(PostalInfo::new(
                PostalInfoType::Internationalized,
                address,
            )))
            .set_voice_number(Some(ContactPhoneNumber::new("867-5309")))
            .set_fax_number(Some(ContactPhoneNumber::new("867-5309").with_extension("1000")))
            .set_email_address(Some("test@example.com".to_string()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_wipe_nulls_exactly_pii_fields() {
        let original = full_contact().capture_snapshot();
        let wiped = wipe_out_pii(&original);

        assert!(wiped.email_address().is_none());
        assert!(wiped.localized_postal_info().is_none());
        assert!(wiped.internationalized_postal_info().is_none());
        assert!(wiped.voice_number().is_none());
        assert!(wiped.fax_number().is_none());

        let mut changed = differing_fields(&original, &wiped, &[]).unwrap();
        changed.sort();
        let mut expected: Vec<String> = PII_FIELDS.iter().map(|f| f.to_string()).collect();
        expected.sort();
        assert_eq!(changed, expected);
        assert_eq!(wiped.auth_info_password(), Some("2fooBAR"));
    }

    #[test]
    fn test_wipe_is_idempotent() {
        let once = wipe_out_pii(&full_contact().capture_snapshot());
        let twice = wipe_out_pii(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_wipe_leaves_input_untouched() {
        let original = full_contact().capture_snapshot();
        let _ = original.wipe_out_pii();
        assert_eq!(original.email_address(), Some("test@example.com"));
    }

    #[test]
    fn test_wipe_of_empty_snapshot_is_identity() {
        let empty = ContactBase::builder().build_base().unwrap();
        assert_eq!(wipe_out_pii(&empty), empty);
    }
}
