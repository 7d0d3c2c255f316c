//! Batch assembly for one source unit.
//!
//! Turns the parsed content of a unit into an ordered [`Batch`]: every
//! element is classified, tagged with the unit's visibility, and carried
//! along verbatim as the record payload. Elements that fail classification
//! stay in the batch as rejected entries so the driver can count them.

use serde_json::Value;

use crate::classify::classify;
use crate::error::ClassificationError;
use crate::models::Record;

const IDENTITY_FIELD: &str = "id";

/// One element of a batch: its identity, if any, and its classification
/// outcome. The identity is kept for rejected elements too so failures can
/// be traced back to the source.
#[derive(Debug)]
pub struct Entry {
    pub identity: Option<String>,
    pub record: Result<Record, ClassificationError>,
}

/// Ordered records of one source unit.
#[derive(Debug, Default)]
pub struct Batch {
    pub entries: Vec<Entry>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records that passed classification, in input order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().filter_map(|e| e.record.as_ref().ok())
    }

    /// Number of entries rejected by the classifier.
    pub fn rejected(&self) -> usize {
        self.entries.iter().filter(|e| e.record.is_err()).count()
    }
}

/// Build the batch for one unit's content.
///
/// A bare non-array value is treated as a one-element sequence.
pub fn materialize(content: Value, visibility: bool) -> Batch {
    let elements = match content {
        Value::Array(items) => items,
        other => vec![other],
    };

    let entries = elements
        .into_iter()
        .map(|element| {
            let identity = identity(&element);
            let record = classify(&element).map(|classified| Record {
                identity: identity.clone(),
                revision: classified.revision,
                retracted_revision: classified.retracted_revision,
                category: classified.category,
                visibility,
                payload: element,
                patch: None,
            });
            Entry { identity, record }
        })
        .collect();

    Batch { entries }
}

/// Visibility implied by a unit name: public when the whole name is an
/// integer literal, private otherwise.
pub fn visibility_for_unit(name: &str) -> bool {
    is_integer_literal(name)
}

fn identity(element: &Value) -> Option<String> {
    match element.get(IDENTITY_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts surrounding whitespace, an optional sign, and single underscores
/// between digits.
fn is_integer_literal(name: &str) -> bool {
    let trimmed = name.trim_matches(|c: char| c.is_ascii_whitespace());
    let digits = trimmed
        .strip_prefix(&['+', '-'][..])
        .unwrap_or(trimmed)
        .as_bytes();

    match (digits.first(), digits.last()) {
        (Some(first), Some(last)) if first.is_ascii_digit() && last.is_ascii_digit() => {}
        _ => return false,
    }

    digits.iter().all(|b| b.is_ascii_digit() || *b == b'_')
        && !digits.windows(2).any(|pair| pair == b"__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_unit_names_are_public() {
        for name in ["42", "0", "-7", "+3", " 12 ", "1_000", "0042"] {
            assert!(visibility_for_unit(name), "{name:?} should be public");
        }
    }

    #[test]
    fn other_unit_names_are_private() {
        for name in ["assets", "", "-", "4.2", "1__000", "_1", "1_", "42a", "0x10", "4 2"] {
            assert!(!visibility_for_unit(name), "{name:?} should be private");
        }
    }

    #[test]
    fn bare_object_becomes_single_entry() {
        let batch = materialize(json!({"id": "a", "type": "Mesh"}), true);
        assert_eq!(batch.len(), 1);
        let record = batch.records().next().unwrap();
        assert_eq!(record.identity.as_deref(), Some("a"));
        assert_eq!(record.category, "Mesh");
        assert!(record.visibility);
        assert_eq!(record.patch, None);
    }

    #[test]
    fn preserves_order_and_payload() {
        let content = json!([
            {"id": "a", "type": "Mesh", "insertedAtRevision": 2},
            {"id": "b", "format": "obj"},
            {"id": "c", "type": "ColorAttribute", "extra": {"nested": [1, 2]}}
        ]);
        let expected = content.as_array().unwrap().clone();

        let batch = materialize(content, false);
        let records: Vec<&Record> = batch.records().collect();

        assert_eq!(records.len(), 3);
        let ids: Vec<_> = records.iter().map(|r| r.identity.as_deref().unwrap()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(records[0].revision, 2);
        assert_eq!(records[1].category, "FormatType");
        assert_eq!(records[2].category, "Attribute");
        for (record, original) in records.iter().zip(&expected) {
            assert_eq!(&record.payload, original);
            assert!(!record.visibility);
        }
    }

    #[test]
    fn rejected_entries_keep_their_position() {
        let batch = materialize(
            json!([{"id": "a", "type": "Mesh"}, {"id": "b"}, {"id": "c", "type": "Mesh"}]),
            true,
        );
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.rejected(), 1);
        assert!(matches!(
            batch.entries[1].record,
            Err(ClassificationError::Unclassifiable)
        ));
    }

    #[test]
    fn rejected_entries_keep_their_identity() {
        let batch = materialize(json!([{"id": "odd", "name": "x"}, {"name": "y"}]), true);
        assert_eq!(batch.rejected(), 2);
        assert_eq!(batch.entries[0].identity.as_deref(), Some("odd"));
        assert_eq!(batch.entries[1].identity, None);
    }

    #[test]
    fn empty_array_is_empty_batch() {
        let batch = materialize(json!([]), true);
        assert!(batch.is_empty());
    }

    #[test]
    fn identity_forms() {
        let batch = materialize(
            json!([
                {"id": 17, "type": "Mesh"},
                {"id": null, "type": "Mesh"},
                {"type": "Mesh"},
                {"id": {"nested": true}, "type": "Mesh"}
            ]),
            true,
        );
        let ids: Vec<_> = batch.records().map(|r| r.identity.clone()).collect();
        assert_eq!(ids, [Some("17".to_string()), None, None, None]);
    }
}
