//! Field-by-field comparison of stored values.
//!
//! Values are compared through their serialized form, so field names here
//! are the names a value serializes with.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{QuireError, QuireResult};
use crate::history::ContactHistory;

/// Fields of a history entry ignored when two entries are compared. The
/// snapshot is compared separately and the parent reference may legitimately
/// be spelled differently by each backend.
pub const HISTORY_EXCLUDED_FIELDS: [&str; 2] = ["contact_base", "contact_repo_id"];

/// Fields of a snapshot ignored when two snapshots are compared. The
/// relational backend does not store the snapshot's own repository id.
pub const SNAPSHOT_EXCLUDED_FIELDS: [&str; 1] = ["repo_id"];

/// Names of the top-level fields whose values differ between `a` and `b`.
///
/// Values that do not serialize to objects are compared whole; a difference
/// is then reported under the empty name.
pub fn differing_fields<T>(a: &T, b: &T, excluded: &[&str]) -> QuireResult<Vec<String>>
where
    T: Serialize + ?Sized,
{
    let left = serde_json::to_value(a)?;
    let right = serde_json::to_value(b)?;

    let (left, right) = match (left, right) {
        (Value::Object(left), Value::Object(right)) => (left, right),
        (left, right) => {
            return Ok(if left == right {
                Vec::new()
            } else {
                vec![String::new()]
            })
        }
    };

    let mut names: Vec<&String> = left.keys().chain(right.keys()).collect();
    names.sort();
    names.dedup();

    Ok(names
        .into_iter()
        .filter(|name| !excluded.contains(&name.as_str()))
        .filter(|name| left.get(*name) != right.get(*name))
        .cloned()
        .collect())
}

/// Whether `a` and `b` agree on every field except `excluded`.
pub fn fields_equal_except<T>(a: &T, b: &T, excluded: &[&str]) -> QuireResult<bool>
where
    T: Serialize + ?Sized,
{
    Ok(differing_fields(a, b, excluded)?.is_empty())
}

/// Check that two contact history entries describe the same event.
///
/// Entry fields are compared without the snapshot and the parent reference;
/// the snapshots are then compared without their repository id. Snapshot
/// presence must agree.
pub fn assert_histories_equal(a: &ContactHistory, b: &ContactHistory) -> QuireResult<()> {
    let mut mismatched = differing_fields(a, b, &HISTORY_EXCLUDED_FIELDS)?;

    match (a.contact_base(), b.contact_base()) {
        (Some(left), Some(right)) => {
            mismatched.extend(
                differing_fields(left, right, &SNAPSHOT_EXCLUDED_FIELDS)?
                    .into_iter()
                    .map(|field| format!("contact_base.{}", field)),
            );
        }
        (None, None) => {}
        _ => mismatched.push("contact_base".to_string()),
    }

    if mismatched.is_empty() {
        return Ok(());
    }

    debug!(
        revision_id = a.revision_id(),
        fields = ?mismatched,
        "History entries differ"
    );
    Err(QuireError::field_mismatch(
        format!(
            "history entries for revision {} and {} differ",
            a.revision_id(),
            b.revision_id()
        ),
        mismatched,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactResource;
    use crate::error::ErrorCode;
    use crate::history::HistoryType;
    use chrono::{TimeZone, Utc};

    fn contact() -> ContactResource {
        ContactResource::builder()
            .set_repo_id("contact1")
            .set_contact_id("contactId")
            .set_email_address(Some("jd@example.com".to_string()))
            .build()
            .unwrap()
    }

    fn history() -> ContactHistory {
        ContactHistory::builder()
            .set_type(HistoryType::ContactUpdate)
            .set_modification_time(Utc.with_ymd_and_hms(2021, 2, 3, 4, 5, 6).unwrap())
            .set_registrar_id("TheRegistrar")
            .set_contact(&contact())
            .build()
            .unwrap()
    }

    #[test]
    fn test_differing_fields_respects_exclusions() {
        let a = contact().capture_snapshot();
        let b = a.to_builder().set_repo_id("").set_contact_id("other").build_base().unwrap();

        let mut diff = differing_fields(&a, &b, &[]).unwrap();
        diff.sort();
        assert_eq!(diff, vec!["contact_id".to_string(), "repo_id".to_string()]);
        assert_eq!(
            differing_fields(&a, &b, &["repo_id"]).unwrap(),
            vec!["contact_id".to_string()]
        );
        assert!(fields_equal_except(&a, &b, &["repo_id", "contact_id"]).unwrap());
    }

    #[test]
    fn test_non_object_values_compared_whole() {
        assert!(differing_fields(&1, &1, &[]).unwrap().is_empty());
        assert_eq!(differing_fields(&1, &2, &[]).unwrap(), vec![String::new()]);
    }

    #[test]
    fn test_snapshot_repo_id_ignored() {
        let a = history();
        let snapshot = a.contact_base().unwrap().to_builder().set_repo_id("").build_base().unwrap();
        let b = a.to_builder().set_contact(snapshot).build().unwrap();
        assert!(assert_histories_equal(&a, &b).is_ok());
    }

    #[test]
    fn test_snapshot_field_difference_reported() {
        let a = history();
        let snapshot = a
            .contact_base()
            .unwrap()
            .to_builder()
            .set_email_address(None)
            .build_base()
            .unwrap();
        let b = a.to_builder().set_contact(snapshot).build().unwrap();

        let err = assert_histories_equal(&a, &b).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CstParityMismatch);
        match err {
            QuireError::Consistency { fields, .. } => {
                assert_eq!(fields, vec!["contact_base.email_address".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_presence_must_agree() {
        let a = history();
        let b = a.to_builder().clear_contact().build().unwrap();
        assert!(assert_histories_equal(&a, &b).is_err());
    }

    #[test]
    fn test_entry_field_difference_reported() {
        let a = history();
        let b = a.to_builder().set_reason("changed").build().unwrap();
        let err = assert_histories_equal(&a, &b).unwrap_err();
        assert!(err.to_string().contains("differ"));
    }
}
