//! # Record Mutation
//!
//! Applies a write to an in-memory table snapshot. Used by the local store's
//! write-through so cached reads reflect writes made while offline.
//!
//! Rows are matched on their `id` field, compared as strings so that `7` and
//! `"7"` refer to the same row.

use serde_json::Value;

use crate::types::{Operation, Record};
use crate::RECORD_ID_FIELD;

/// The row id of a record as a string, if present.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(RECORD_ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Applies one write to `rows` and reports whether anything changed.
///
/// ## Semantics
/// ```text
/// insert  row with same id exists → replaced, otherwise appended
/// update  row with same id exists → fields merged, otherwise appended
/// delete  rows with the payload's id removed (no id → no-op)
/// ```
pub fn apply_operation(rows: &mut Vec<Record>, operation: Operation, payload: &Record) -> bool {
    let id = record_id(payload);
    let position = id
        .as_deref()
        .and_then(|id| rows.iter().position(|r| record_id(r).as_deref() == Some(id)));

    match operation {
        Operation::Insert => {
            match position {
                Some(idx) => rows[idx] = payload.clone(),
                None => rows.push(payload.clone()),
            }
            true
        }
        Operation::Update => {
            match position {
                Some(idx) => {
                    let row = &mut rows[idx];
                    for (key, value) in payload {
                        row.insert(key.clone(), value.clone());
                    }
                }
                None => rows.push(payload.clone()),
            }
            true
        }
        Operation::Delete => {
            let Some(id) = id else {
                return false;
            };
            let before = rows.len();
            rows.retain(|r| record_id(r).as_deref() != Some(id.as_str()));
            rows.len() != before
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_id_accepts_strings_and_numbers() {
        assert_eq!(record_id(&row(json!({ "id": "o-1" }))), Some("o-1".into()));
        assert_eq!(record_id(&row(json!({ "id": 42 }))), Some("42".into()));
        assert_eq!(record_id(&row(json!({ "id": "" }))), None);
        assert_eq!(record_id(&row(json!({ "name": "x" }))), None);
    }

    #[test]
    fn test_insert_appends_or_replaces() {
        let mut rows = vec![row(json!({ "id": 1, "qty": 1 }))];
        apply_operation(&mut rows, Operation::Insert, &row(json!({ "id": 2, "qty": 5 })));
        assert_eq!(rows.len(), 2);

        apply_operation(&mut rows, Operation::Insert, &row(json!({ "id": "1", "qty": 9 })));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["qty"], json!(9));
    }

    #[test]
    fn test_update_merges_fields() {
        let mut rows = vec![row(json!({ "id": "o-1", "status": "new", "total": 12 }))];
        apply_operation(
            &mut rows,
            Operation::Update,
            &row(json!({ "id": "o-1", "status": "shipped" })),
        );
        assert_eq!(rows[0]["status"], json!("shipped"));
        assert_eq!(rows[0]["total"], json!(12));
    }

    #[test]
    fn test_delete_removes_matching_rows() {
        let mut rows = vec![row(json!({ "id": 1 })), row(json!({ "id": 2 }))];
        assert!(apply_operation(&mut rows, Operation::Delete, &row(json!({ "id": 1 }))));
        assert_eq!(rows.len(), 1);

        assert!(!apply_operation(&mut rows, Operation::Delete, &row(json!({ "id": 99 }))));
        assert!(!apply_operation(&mut rows, Operation::Delete, &Record::new()));
        assert_eq!(rows.len(), 1);
    }
}
