use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_toolkit::app_state::AppState;
use image_toolkit::auth::JwtVerifier;
use image_toolkit::config::AppConfig;
use image_toolkit::db;
use image_toolkit::routes;
use image_toolkit::services::{
    dispatch::{DispatchChannel, RoutingTable},
    image_proxy::ImageProxy,
    storage::CloudStorage,
    tokens::Pricing,
};

/// Worker callbacks carry no binaries; anything larger is hostile.
const CALLBACK_BODY_LIMIT: usize = 16 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-toolkit server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("jobs_created_total", "Total processing jobs created");
    metrics::describe_counter!(
        "jobs_dispatch_failed_total",
        "Jobs that could not be published to the workers"
    );
    metrics::describe_counter!("jobs_completed_total", "Jobs reported completed by workers");
    metrics::describe_counter!("jobs_failed_total", "Jobs that ended in a failed state");
    metrics::describe_counter!("premium_unlocks_total", "Successful premium unlocks");
    metrics::describe_counter!("tokens_credited_total", "Tokens credited to user balances");
    metrics::describe_counter!("tokens_debited_total", "Tokens debited from user balances");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize cloud storage client
    tracing::info!("Initializing cloud storage client");
    let storage = CloudStorage::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        &config.storage_public_url,
    )
    .expect("Failed to initialize storage client");

    // Initialize the worker dispatch channel
    tracing::info!("Connecting to the dispatch channel");
    let routing = RoutingTable::from_config(&config);
    let dispatch = DispatchChannel::new(&config.redis_url, routing)
        .expect("Failed to initialize dispatch channel");

    // Initialize the image proxy (thumbnail fallback generation)
    let proxy = ImageProxy::new().expect("Failed to initialize image proxy");

    let jwt = JwtVerifier::new(&config.jwt_secret);

    // Create shared application state
    let state = AppState::new(db_pool, dispatch, storage, proxy, Pricing::default(), jwt);

    // Worker callback route gets its own strict body limit: the endpoint is
    // reachable without per-user auth.
    let callback_routes = Router::new()
        .route(
            "/api/v1/jobs/{job_id}/status",
            post(routes::jobs::update_job_status),
        )
        .layer(RequestBodyLimitLayer::new(CALLBACK_BODY_LIMIT));

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/jobs",
            post(routes::jobs::create_job).get(routes::jobs::list_jobs),
        )
        .route(
            "/api/v1/jobs/{job_id}/status",
            get(routes::jobs::get_job_status),
        )
        .route(
            "/api/v1/jobs/{job_id}/unlock-premium",
            post(routes::jobs::unlock_premium),
        )
        .route("/api/v1/tokens/balance", get(routes::tokens::get_balance))
        .route("/api/v1/tokens/purchase", post(routes::tokens::purchase))
        .route(
            "/api/v1/tokens/add-from-ad",
            get(routes::tokens::add_from_ad),
        )
        .route("/api/v1/images/{job_id}", get(routes::images::full_image))
        .route(
            "/api/v1/images/{job_id}/thumbnail",
            get(routes::images::thumbnail),
        )
        .merge(callback_routes)
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting image-toolkit on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
