//! SQLite-backed [`Store`] implementation.
//!
//! JSON documents are stored as `TEXT`. Each upsert is a single
//! `INSERT .. ON CONFLICT .. DO UPDATE` statement, so a row is either in its
//! old or its new state, never in between.
//!
//! # Write-Ahead Logging (WAL)
//!
//! WAL mode is enabled for all connections so the concurrent writers of a
//! batch queue on SQLite's write lock (bounded by the busy timeout) instead
//! of failing immediately.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::StoreError;
use crate::models::{RowKey, StoredRow};

use super::{fetch_statement, upsert_statement, ParamStyle, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
    upsert_sql: String,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`.
    ///
    /// The parent directory of the database file is created as well.
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool, table))
    }

    pub fn new(pool: SqlitePool, table: &str) -> Self {
        Self {
            upsert_sql: upsert_statement(table, ParamStyle::Question),
            table: table.to_string(),
            pool,
        }
    }

    /// Number of rows in the table.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn encoded(row: &StoredRow) -> Result<(String, Option<String>), StoreError> {
    let content = serde_json::to_string(&row.payload)?;
    let edit = row.patch.as_ref().map(serde_json::to_string).transpose()?;
    Ok((content, edit))
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(&self, row: &StoredRow) -> Result<(), StoreError> {
        let (content, edit) = encoded(row)?;
        sqlx::query(&self.upsert_sql)
            .bind(&row.identity)
            .bind(row.revision)
            .bind(row.visibility)
            .bind(&row.category)
            .bind(row.retracted_revision)
            .bind(edit)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_many(&self, rows: &[StoredRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let (content, edit) = encoded(row)?;
            sqlx::query(&self.upsert_sql)
                .bind(&row.identity)
                .bind(row.revision)
                .bind(row.visibility)
                .bind(&row.category)
                .bind(row.retracted_revision)
                .bind(edit)
                .bind(content)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch(&self, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        let row = sqlx::query(&fetch_statement(&self.table, ParamStyle::Question))
            .bind(&key.identity)
            .bind(key.revision)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let content: String = row.try_get("content")?;
        let edit: Option<String> = row.try_get("edit")?;
        Ok(Some(StoredRow {
            identity: row.try_get("immutable_id")?,
            revision: row.try_get("inserted_at_revision")?,
            visibility: row.try_get("public")?,
            category: row.try_get("type")?,
            retracted_revision: row.try_get("deleted_at_revision")?,
            payload: serde_json::from_str(&content)?,
            patch: edit.as_deref().map(serde_json::from_str).transpose()?,
        }))
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                immutable_id TEXT NOT NULL,
                inserted_at_revision INTEGER NOT NULL,
                public BOOLEAN NOT NULL,
                "type" TEXT NOT NULL,
                deleted_at_revision INTEGER,
                edit TEXT,
                content TEXT NOT NULL,
                PRIMARY KEY (immutable_id, inserted_at_revision)
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
