//! In-memory [`Store`] implementation for tests.
//!
//! Rows live in a `HashMap` keyed by [`RowKey`] behind a `RwLock`, which
//! gives the same at-most-one-row-per-key behavior as the SQL backends.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{RowKey, StoredRow};

use super::Store;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    rows: RwLock<HashMap<RowKey, StoredRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every row, ordered by key.
    pub fn rows(&self) -> Vec<StoredRow> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<StoredRow> = rows.values().cloned().collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        out
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, row: &StoredRow) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.insert(row.key(), row.clone());
        Ok(())
    }

    async fn upsert_many(&self, batch: &[StoredRow]) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        for row in batch {
            rows.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn fetch(&self, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(key).cloned())
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, revision: i64, category: &str) -> StoredRow {
        StoredRow {
            identity: id.to_string(),
            revision,
            visibility: true,
            category: category.to_string(),
            retracted_revision: None,
            payload: json!({"id": id, "type": category}),
            patch: None,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_same_key() {
        let store = InMemoryStore::new();
        store.upsert(&row("a", 0, "Mesh")).await.unwrap();
        store.upsert(&row("a", 0, "Attribute")).await.unwrap();
        store.upsert(&row("a", 1, "Mesh")).await.unwrap();

        assert_eq!(store.len(), 2);
        let got = store.fetch(&RowKey::new("a", 0)).await.unwrap().unwrap();
        assert_eq!(got.category, "Attribute");
    }

    #[tokio::test]
    async fn upsert_many_last_wins() {
        let store = InMemoryStore::new();
        store
            .upsert_many(&[row("a", 0, "Mesh"), row("a", 0, "FormatType")])
            .await
            .unwrap();
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, "FormatType");
    }

    #[tokio::test]
    async fn fetch_missing_is_none() {
        let store = InMemoryStore::new();
        assert!(store.fetch(&RowKey::new("nope", 0)).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
