//! Rush rotator
//!
//! Rotates which checked-in candidate is active and keeps the shared rush
//! spreadsheet in sync with the database.
//!
//! This service:
//! - Loads configuration and service-account credentials once at startup
//! - Connects to MongoDB
//! - Runs a rotation cycle every period until Ctrl-C

use std::sync::Arc;

use anyhow::{Context, Result};
use rush_rotator::{
    config::Config,
    sheets::{GoogleSheetsPublisher, ServiceAccountKey, ServiceAccountTokenSource},
    store::MongoRecordStore,
    RotationCycle, RotationWorker,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing (prefer RUST_LOG, fallback to RUSH_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting rush rotator");
    info!(
        db_name = %config.db_name,
        spreadsheet_id = %config.spreadsheet_id,
        data_sheet = %config.data_sheet_name,
        period_secs = config.rotation_period.as_secs(),
        once = config.once,
        "Configuration loaded"
    );

    let key = ServiceAccountKey::load(&config.service_account_key)
        .context("Failed to load service account key")?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("rush-rotator/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let tokens = ServiceAccountTokenSource::new(key, config.oauth_token_url.clone(), http.clone())
        .context("Failed to initialize service account credentials")?;

    let publisher = GoogleSheetsPublisher::new(
        http,
        &config.sheets_api_url,
        config.spreadsheet_id.clone(),
        config.data_sheet_name.clone(),
        Arc::new(tokens),
    )
    .context("Failed to initialize sheets publisher")?;

    let store = match MongoRecordStore::connect(config.mongo_uri.expose(), &config.db_name).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to connect to MongoDB");
            return Err(e).context("Failed to connect to MongoDB");
        }
    };

    let worker = RotationWorker::new(
        RotationCycle::new(Arc::new(store), Arc::new(publisher)),
        config.rotation_period,
    )
    .once(config.once);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    // An in-flight cycle finishes before the worker observes shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            // Dropping the sender would read as a shutdown request.
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let stats = worker_handle
        .await
        .context("Rotation worker task panicked")?;

    if config.once && stats.cycles_failed > 0 {
        anyhow::bail!("Rotation cycle failed (once mode)");
    }

    info!(
        cycles_run = stats.cycles_run,
        cycles_failed = stats.cycles_failed,
        "Rush rotator shutdown complete"
    );
    Ok(())
}
