use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use picfit::app_state::AppState;
use picfit::config::AppConfig;
use picfit::db;
use picfit::routes;
use picfit::services::{media::MediaStore, staging::StagingArea};

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

    tracing::info!("Initializing picfit server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "generation_jobs_submitted",
        "Total generation jobs submitted"
    );
    metrics::describe_counter!(
        "generation_jobs_completed",
        "Total generation jobs completed"
    );
    metrics::describe_counter!("generation_jobs_failed", "Total generation jobs that failed");
    metrics::describe_counter!(
        "generation_jobs_reaped",
        "Total generation jobs force-failed after the processing timeout"
    );
    metrics::describe_counter!(
        "credit_debit_failures",
        "Completed jobs whose credit debit could not be applied"
    );
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time to process a generation job"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Current number of queued generation jobs"
    );

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

    // Initialize input staging and result storage
    tracing::info!("Initializing staging and media directories");
    let staging = Arc::new(
        StagingArea::init(config.staging_dir.clone())
            .await
            .expect("Failed to initialize staging directory"),
    );
    let media = Arc::new(
        MediaStore::init(config.media_dir.clone())
            .await
            .expect("Failed to initialize media directory"),
    );

    let bind_addr = config.bind_addr.clone();
    let media_root = media.root().to_path_buf();

    // Create shared application state
    let state = AppState::new(db_pool, staging, media, Arc::new(config));

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/generate", post(routes::generate::submit_generation))
        .route(
            "/api/v1/generate/{job_id}",
            get(routes::generate::get_generation_status),
        )
        .route("/api/v1/jobs/stats", get(routes::health::job_stats))
        .with_state(state)
        // Generated results are served straight off the media store
        .nest_service("/generated", ServeDir::new(media_root))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024 * 1024)); // 6 photos @ 10 MB + form overhead

    tracing::info!("Starting picfit on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
