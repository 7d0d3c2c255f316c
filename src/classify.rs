//! Record classification.
//!
//! Derives the category label and revision fields of one raw JSON object.
//! Classification never guesses: an object that carries neither a `type`
//! nor a truthy `format` field is rejected with
//! [`ClassificationError::Unclassifiable`].

use serde_json::{Map, Value};

use crate::error::ClassificationError;

/// Category assigned to every `*Attribute` type.
pub const ATTRIBUTE_CATEGORY: &str = "Attribute";
/// Category assigned to objects identified only by a `format` field.
pub const FORMAT_CATEGORY: &str = "FormatType";

const TYPE_FIELD: &str = "type";
const FORMAT_FIELD: &str = "format";
const INSERTED_FIELD: &str = "insertedAtRevision";
const DELETED_FIELD: &str = "deletedAtRevision";

/// Successful classification of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub category: String,
    pub revision: i64,
    pub retracted_revision: Option<i64>,
}

/// Classify a raw JSON value.
pub fn classify(value: &Value) -> Result<Classified, ClassificationError> {
    let object = value.as_object().ok_or(ClassificationError::NotAnObject)?;

    Ok(Classified {
        category: category(object)?,
        revision: revision(object)?,
        retracted_revision: retracted_revision(object)?,
    })
}

fn category(object: &Map<String, Value>) -> Result<String, ClassificationError> {
    if let Some(ty) = object.get(TYPE_FIELD) {
        let ty = ty.as_str().ok_or(ClassificationError::TypeNotString)?;
        if ty.ends_with(ATTRIBUTE_CATEGORY) {
            return Ok(ATTRIBUTE_CATEGORY.to_string());
        }
        return Ok(ty.to_string());
    }

    match object.get(FORMAT_FIELD) {
        Some(format) if is_truthy(format) => Ok(FORMAT_CATEGORY.to_string()),
        _ => Err(ClassificationError::Unclassifiable),
    }
}

fn revision(object: &Map<String, Value>) -> Result<i64, ClassificationError> {
    match object.get(INSERTED_FIELD) {
        Some(value) if is_truthy(value) => value
            .as_i64()
            .filter(|n| *n >= 0)
            .ok_or_else(|| invalid_revision(INSERTED_FIELD, value)),
        _ => Ok(0),
    }
}

fn retracted_revision(object: &Map<String, Value>) -> Result<Option<i64>, ClassificationError> {
    match object.get(DELETED_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| invalid_revision(DELETED_FIELD, value)),
    }
}

fn invalid_revision(field: &'static str, value: &Value) -> ClassificationError {
    ClassificationError::InvalidRevision {
        field,
        value: value.to_string(),
    }
}

/// JSON truthiness: null, false, zero, and empty strings/arrays/objects are
/// falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
