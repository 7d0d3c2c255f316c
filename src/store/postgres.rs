//! PostgreSQL-backed [`Store`] implementation.
//!
//! JSON documents are stored as `JSONB`. PostgreSQL serializes concurrent
//! `ON CONFLICT` writes to the same key on its own, so the upsert engine can
//! dispatch a whole batch at once without extra locking.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;

use crate::error::StoreError;
use crate::models::{RowKey, StoredRow};

use super::{fetch_statement, upsert_statement, ParamStyle, Store};

/// PostgreSQL implementation of the [`Store`] trait.
pub struct PgStore {
    pool: PgPool,
    table: String,
    upsert_sql: String,
}

impl PgStore {
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, table))
    }

    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            upsert_sql: upsert_statement(table, ParamStyle::Dollar),
            table: table.to_string(),
            pool,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, row: &StoredRow) -> Result<(), StoreError> {
        sqlx::query(&self.upsert_sql)
            .bind(&row.identity)
            .bind(row.revision)
            .bind(row.visibility)
            .bind(&row.category)
            .bind(row.retracted_revision)
            .bind(row.patch.as_ref().map(Json))
            .bind(Json(&row.payload))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_many(&self, rows: &[StoredRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&self.upsert_sql)
                .bind(&row.identity)
                .bind(row.revision)
                .bind(row.visibility)
                .bind(&row.category)
                .bind(row.retracted_revision)
                .bind(row.patch.as_ref().map(Json))
                .bind(Json(&row.payload))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch(&self, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        let row = sqlx::query(&fetch_statement(&self.table, ParamStyle::Dollar))
            .bind(&key.identity)
            .bind(key.revision)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let content: Json<serde_json::Value> = row.try_get("content")?;
        let edit: Option<Json<serde_json::Value>> = row.try_get("edit")?;
        Ok(Some(StoredRow {
            identity: row.try_get("immutable_id")?,
            revision: row.try_get("inserted_at_revision")?,
            visibility: row.try_get("public")?,
            category: row.try_get("type")?,
            retracted_revision: row.try_get("deleted_at_revision")?,
            payload: content.0,
            patch: edit.map(|e| e.0),
        }))
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                immutable_id TEXT NOT NULL,
                inserted_at_revision BIGINT NOT NULL,
                public BOOLEAN NOT NULL,
                "type" TEXT NOT NULL,
                deleted_at_revision BIGINT,
                edit JSONB,
                content JSONB NOT NULL,
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
