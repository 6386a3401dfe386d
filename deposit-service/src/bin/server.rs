//! Deposit service binary

use accrual_engine::SystemClock;
use anyhow::Context;
use deposit_service::{spawn_dispatcher, Config, DepositDesk, LogNotifier};
use ledger_core::RocksLedger;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Yieldvault deposit server");

    // Load configuration
    let config = match std::env::var("DEPOSIT_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    // Open ledger
    let ledger = RocksLedger::open(&config.ledger).context("opening ledger")?;
    tracing::info!(data_dir = %config.ledger.data_dir.display(), "Ledger opened");

    let (notifications, dispatcher) =
        spawn_dispatcher(Arc::new(LogNotifier), config.notifications.queue_capacity);

    let desk = DepositDesk::new(&config, Arc::new(ledger), Arc::new(SystemClock), notifications)
        .context("building deposit desk")?;
    tracing::info!(?desk, "Deposit desk ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down deposit server");
    tracing::debug!(metrics = %desk.metrics().render(), "Final metrics");
    drop(desk);
    if let Err(e) = dispatcher.await {
        tracing::warn!(error = %e, "Notification dispatcher ended abnormally");
    }
    Ok(())
}
