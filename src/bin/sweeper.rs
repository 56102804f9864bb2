use chrono::{NaiveDate, Timelike, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use image_toolkit::config::AppConfig;
use image_toolkit::db;
use image_toolkit::services::{retention, storage::CloudStorage};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Hour (UTC) of the daily emergency sweep.
const EMERGENCY_SWEEP_HOUR: u32 = 2;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting retention sweeper");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize storage client
    let storage = CloudStorage::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        &config.storage_public_url,
    )
    .expect("Failed to initialize storage client");

    tracing::info!("Sweeper ready, starting sweep loop");

    let mut last_emergency_sweep: Option<NaiveDate> = None;

    loop {
        let now = Utc::now();

        match retention::sweep_expired(&db_pool, &storage, now).await {
            Ok(deleted) => tracing::info!(deleted, "retention sweep complete"),
            Err(e) => tracing::error!(error = %e, "retention sweep failed"),
        }

        if now.hour() == EMERGENCY_SWEEP_HOUR
            && last_emergency_sweep != Some(now.date_naive())
        {
            match retention::sweep_aged(&db_pool, &storage, now).await {
                Ok(deleted) => {
                    last_emergency_sweep = Some(now.date_naive());
                    tracing::info!(deleted, "emergency sweep complete");
                }
                Err(e) => tracing::error!(error = %e, "emergency sweep failed"),
            }
        }

        sleep(SWEEP_INTERVAL).await;
    }
}
