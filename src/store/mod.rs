//! Storage abstraction for the loader.
//!
//! The [`Store`] trait is the only seam between the pipeline and the
//! database. Every implementation must give each [`upsert`](Store::upsert)
//! insert-or-overwrite semantics on the `(identity, revision)` key and must
//! be safe to call concurrently from many tasks.
//!
//! | Backend | Module | Used for |
//! |---------|--------|----------|
//! | SQLite | [`sqlite`] | local runs, tests |
//! | PostgreSQL | [`postgres`] | production target |
//! | In-memory | [`memory`] | unit tests |

pub mod memory;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{RowKey, StoredRow};

pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](Store::upsert) | Insert or overwrite one row, atomically |
/// | [`upsert_many`](Store::upsert_many) | Write a page of rows in one transaction |
/// | [`fetch`](Store::fetch) | Read back one row by key |
/// | [`ensure_schema`](Store::ensure_schema) | Create the table if missing |
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs (`"sqlite"`, `"postgres"`, `"memory"`).
    fn backend(&self) -> &'static str;

    /// Insert the row, or overwrite every non-key column of the existing
    /// row with the same key.
    async fn upsert(&self, row: &StoredRow) -> Result<(), StoreError>;

    /// Write several rows so that either all of them or none are applied.
    ///
    /// Rows sharing a key are applied in slice order. The default
    /// implementation is not atomic; backends override it.
    async fn upsert_many(&self, rows: &[StoredRow]) -> Result<(), StoreError> {
        for row in rows {
            self.upsert(row).await?;
        }
        Ok(())
    }

    /// Read back a single row.
    async fn fetch(&self, key: &RowKey) -> Result<Option<StoredRow>, StoreError>;

    /// Create the table and its primary key if they do not exist yet.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Release pooled connections.
    async fn close(&self) {}
}

/// Column list shared by every SQL backend, in bind order.
const COLUMNS: &str =
    r#"immutable_id, inserted_at_revision, public, "type", deleted_at_revision, edit, content"#;

/// Bind-parameter syntax of a SQL backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamStyle {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

/// Build the insert-or-overwrite statement for `table`.
///
/// Key columns appear only in the conflict target; every other column is
/// overwritten from the incoming row.
pub(crate) fn upsert_statement(table: &str, style: ParamStyle) -> String {
    let params: Vec<String> = (1..=7)
        .map(|i| match style {
            ParamStyle::Question => "?".to_string(),
            ParamStyle::Dollar => format!("${}", i),
        })
        .collect();

    format!(
        r#"INSERT INTO {table} ({COLUMNS})
        VALUES ({params})
        ON CONFLICT (immutable_id, inserted_at_revision) DO UPDATE SET
            public = excluded.public,
            "type" = excluded."type",
            deleted_at_revision = excluded.deleted_at_revision,
            edit = excluded.edit,
            content = excluded.content"#,
        params = params.join(", ")
    )
}

/// Build the single-row lookup statement for `table`.
pub(crate) fn fetch_statement(table: &str, style: ParamStyle) -> String {
    let (id, rev) = match style {
        ParamStyle::Question => ("?", "?"),
        ParamStyle::Dollar => ("$1", "$2"),
    };
    format!(
        "SELECT {COLUMNS} FROM {table} WHERE immutable_id = {id} AND inserted_at_revision = {rev}"
    )
}

/// Reject table names that cannot be interpolated into SQL verbatim.
pub fn validate_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
