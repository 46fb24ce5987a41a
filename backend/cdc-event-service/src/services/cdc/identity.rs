//! Record identity extraction and the email-based update heuristic.

use super::models::{scalar_to_string, CdcOperation, RowImage};

/// Identity fields in order of preference: explicit id, username, email
const IDENTITY_FIELDS: [&str; 3] = ["id", "username", "email"];

/// Email substrings marking a logical update disguised as an insert
const UPDATE_EMAIL_MARKERS: [&str; 2] = ["updated_", "mass_update_"];

/// Derive the correlation identity of a row image.
///
/// Returns `None` when no identity field carries a usable scalar; such a
/// record is never a reconciliation candidate.
pub fn extract_record_id(row: &RowImage) -> Option<String> {
    IDENTITY_FIELDS
        .iter()
        .filter_map(|field| row.get(*field))
        .find_map(scalar_to_string)
}

/// Apply the INSERT -> UPDATE email heuristic to a resolved operation.
///
/// Test-data convention only: fixtures mark logical updates by rewriting the
/// email to `updated_*` / `mass_update_*`. Disabled via configuration.
pub fn reclassify(operation: CdcOperation, row: Option<&RowImage>, enabled: bool) -> CdcOperation {
    if !enabled || operation != CdcOperation::Insert {
        return operation;
    }

    let marked = row
        .and_then(|r| r.get("email"))
        .and_then(|v| v.as_str())
        .map(|email| UPDATE_EMAIL_MARKERS.iter().any(|m| email.contains(m)))
        .unwrap_or(false);

    if marked {
        CdcOperation::Update
    } else {
        operation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RowImage {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identity_preference_order() {
        let r = row(json!({"email": "a@x.com", "username": "alice", "id": 7}));
        assert_eq!(extract_record_id(&r), Some("7".to_string()));

        let r = row(json!({"email": "a@x.com", "username": "alice"}));
        assert_eq!(extract_record_id(&r), Some("alice".to_string()));

        let r = row(json!({"email": "a@x.com"}));
        assert_eq!(extract_record_id(&r), Some("a@x.com".to_string()));
    }

    #[test]
    fn test_null_id_falls_through() {
        let r = row(json!({"id": null, "username": "bob"}));
        assert_eq!(extract_record_id(&r), Some("bob".to_string()));
    }

    #[test]
    fn test_no_identity() {
        let r = row(json!({"name": "anonymous", "score": 3}));
        assert_eq!(extract_record_id(&r), None);
    }

    #[test]
    fn test_reclassify_marked_insert() {
        let r = row(json!({"id": 42, "email": "updated_42@x.com"}));
        assert_eq!(
            reclassify(CdcOperation::Insert, Some(&r), true),
            CdcOperation::Update
        );

        let r = row(json!({"id": 42, "email": "mass_update_42@x.com"}));
        assert_eq!(
            reclassify(CdcOperation::Insert, Some(&r), true),
            CdcOperation::Update
        );
    }

    #[test]
    fn test_reclassify_leaves_others_alone() {
        let r = row(json!({"id": 42, "email": "updated_42@x.com"}));
        assert_eq!(
            reclassify(CdcOperation::Delete, Some(&r), true),
            CdcOperation::Delete
        );
        assert_eq!(
            reclassify(CdcOperation::Insert, Some(&r), false),
            CdcOperation::Insert
        );

        let plain = row(json!({"id": 42, "email": "someone@x.com"}));
        assert_eq!(
            reclassify(CdcOperation::Insert, Some(&plain), true),
            CdcOperation::Insert
        );
        assert_eq!(reclassify(CdcOperation::Insert, None, true), CdcOperation::Insert);
    }
}
