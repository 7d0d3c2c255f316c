//! Core data models used throughout the loader.
//!
//! A [`Record`] is built transiently for every element of a source unit and
//! dropped once its write completes or fails; the store is the only durable
//! owner of record state.

use serde::Serialize;
use serde_json::Value;

use crate::error::RecordError;

/// One entity snapshot, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stable entity identifier (`id` field). Absent identities are rejected
    /// by the upsert engine, never written.
    pub identity: Option<String>,
    pub revision: i64,
    pub retracted_revision: Option<i64>,
    pub category: String,
    /// Derived from the source unit name, not from the record content.
    pub visibility: bool,
    /// The original JSON element, unmodified.
    pub payload: Value,
    /// Reserved for partial-update documents. Always `None` today.
    pub patch: Option<Value>,
}

/// Primary key of a stored row: `(identity, revision)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RowKey {
    pub identity: String,
    pub revision: i64,
}

impl RowKey {
    pub fn new(identity: impl Into<String>, revision: i64) -> Self {
        Self {
            identity: identity.into(),
            revision,
        }
    }
}

/// A row as it exists in the store. Unlike [`Record`], the identity is
/// mandatory, so only keyed records ever reach a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRow {
    pub identity: String,
    pub revision: i64,
    pub visibility: bool,
    pub category: String,
    pub retracted_revision: Option<i64>,
    pub payload: Value,
    pub patch: Option<Value>,
}

impl TryFrom<Record> for StoredRow {
    type Error = RecordError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        Ok(Self {
            identity: record.identity.ok_or(RecordError::MissingKey)?,
            revision: record.revision,
            visibility: record.visibility,
            category: record.category,
            retracted_revision: record.retracted_revision,
            payload: record.payload,
            patch: record.patch,
        })
    }
}

impl StoredRow {
    pub fn key(&self) -> RowKey {
        RowKey::new(self.identity.clone(), self.revision)
    }
}

/// Per-unit or per-run record counts.
///
/// `attempted = succeeded + failed`; `skipped` counts records that were
/// never dispatched because the run was cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Counts {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }

    pub fn merge(&mut self, other: &Counts) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}
