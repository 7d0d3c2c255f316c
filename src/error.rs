//! Error types for the loader.
//!
//! Every per-record and per-unit failure has its own type so the driver can
//! recover at the smallest scope and still report what went wrong. Only
//! precondition failures (bad config, unreachable store, missing input
//! directory) escape as `anyhow::Error` from the top-level commands.

use std::path::PathBuf;

use thiserror::Error;

/// A record whose category or revision fields cannot be derived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("`type` field is not a string")]
    TypeNotString,

    #[error("record has neither a `type` field nor a truthy `format` field")]
    Unclassifiable,

    #[error("`{field}` is not a non-negative integer: {value}")]
    InvalidRevision { field: &'static str, value: String },
}

/// A write rejected by the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Why a single record was not written.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("classification failed: {0}")]
    Classification(#[from] ClassificationError),

    #[error("record has no identity (`id` field)")]
    MissingKey,

    #[error("store rejected write: {0}")]
    Store(#[from] StoreError),
}

impl RecordError {
    /// Short machine-readable label used in progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Classification(_) => "classification",
            RecordError::MissingKey => "missing_key",
            RecordError::Store(_) => "store",
        }
    }
}

/// A source unit whose content could not be read or parsed.
#[derive(Error, Debug)]
pub enum SourceReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {name} as JSON: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_error_kinds() {
        assert_eq!(
            RecordError::from(ClassificationError::Unclassifiable).kind(),
            "classification"
        );
        assert_eq!(RecordError::MissingKey.kind(), "missing_key");
        assert_eq!(
            RecordError::from(StoreError::Rejected("boom".into())).kind(),
            "store"
        );
    }

    #[test]
    fn invalid_revision_message_names_field() {
        let err = ClassificationError::InvalidRevision {
            field: "insertedAtRevision",
            value: "\"7\"".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`insertedAtRevision` is not a non-negative integer: \"7\""
        );
    }
}
