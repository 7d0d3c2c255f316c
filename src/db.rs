//! Store connection.
//!
//! Picks the [`Store`] backend from the scheme of `db.url` and opens its
//! connection pool.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::config::{Backend, DbConfig};
use crate::store::{PgStore, SqliteStore, Store};

pub async fn connect(db: &DbConfig) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match db.backend() {
        Some(Backend::Sqlite) => Arc::new(
            SqliteStore::connect(&db.url, &db.table, db.max_connections)
                .await
                .with_context(|| format!("Failed to open {}", redacted_url(&db.url)))?,
        ),
        Some(Backend::Postgres) => Arc::new(
            PgStore::connect(&db.url, &db.table, db.max_connections)
                .await
                .with_context(|| format!("Failed to connect to {}", redacted_url(&db.url)))?,
        ),
        None => bail!("Unsupported database url: {}", redacted_url(&db.url)),
    };

    debug!(
        backend = store.backend(),
        table = %db.table,
        url = %redacted_url(&db.url),
        "store connected"
    );
    Ok(store)
}

/// `url` with the password replaced by `***`, for logs and errors.
pub fn redacted_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn password_is_redacted() {
        assert_eq!(
            redacted_url("postgresql://loader:s3cret@db:5432/assets"),
            "postgresql://loader:***@db:5432/assets"
        );
        assert_eq!(
            redacted_url("postgres://loader@db/assets"),
            "postgres://loader@db/assets"
        );
        assert_eq!(redacted_url("sqlite:./data/x.db"), "sqlite:./data/x.db");
    }

    #[tokio::test]
    async fn connects_sqlite_by_scheme() {
        let tmp = TempDir::new().unwrap();
        let db = DbConfig {
            url: format!("sqlite:{}", tmp.path().join("nested/assets.db").display()),
            table: "assets".to_string(),
            max_connections: 2,
        };
        let store = connect(&db).await.unwrap();
        assert_eq!(store.backend(), "sqlite");
        assert!(tmp.path().join("nested/assets.db").exists());
        store.close().await;
    }

    #[tokio::test]
    async fn rejects_unknown_scheme() {
        let db = DbConfig {
            url: "mysql://root@localhost/x".to_string(),
            table: "assets".to_string(),
            max_connections: 1,
        };
        assert!(connect(&db).await.is_err());
    }
}
