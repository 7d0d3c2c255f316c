//! `init`: create the target table if it does not exist.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::tunnel::Tunnel;

pub async fn run_init(config: &Config) -> Result<()> {
    let tunnel = match &config.tunnel {
        Some(tunnel_config) => Some(Tunnel::open(tunnel_config).await?),
        None => None,
    };

    let store = db::connect(&config.db).await?;
    store
        .ensure_schema()
        .await
        .with_context(|| format!("Failed to create table '{}'", config.db.table))?;
    info!(table = %config.db.table, backend = store.backend(), "schema ready");
    store.close().await;

    if let Some(tunnel) = tunnel {
        tunnel.close().await;
    }

    println!("Table '{}' ready ({}).", config.db.table, store.backend());
    Ok(())
}
