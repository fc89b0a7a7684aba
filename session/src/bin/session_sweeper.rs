use anyhow::Context;

use common::logger::init_logger;
use session::{SQLiteSessionStore, SessionStore, StoreConfig};

/// Keeps a session database tidy: opens the store (which sweeps expired rows
/// immediately) and leaves the periodic sweep running until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("session-sweeper", is_production);

    let cfg = StoreConfig::from_env().context("invalid session store configuration")?;

    tracing::info!(
        table = %cfg.table,
        target_db = ?cfg.target(),
        every_secs = cfg.sweep_interval_secs,
        "Starting session sweeper..."
    );

    let store: SQLiteSessionStore = SQLiteSessionStore::builder(cfg.clone())
        .on_connect(|| tracing::info!("session store ready"))
        .open()
        .await
        .context("failed to open session store")?;

    let rows = store.length().await.context("failed to count sessions")?;
    tracing::info!(rows, "sessions on disk after startup sweep");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    store.close().await;
    Ok(())
}
