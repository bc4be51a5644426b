use picfit::{
    config::AppConfig,
    db::{self, queries},
    services::{
        gemini::GeminiClient,
        media::MediaStore,
        processor::{JobProcessor, ProcessorConfig},
        retry::RetryPolicy,
        staging::StagingArea,
    },
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting generation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
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
    let generator = Arc::new(
        GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
            RetryPolicy::default(),
            media.clone(),
        )
        .expect("Failed to initialize Gemini client"),
    );

    let processor = JobProcessor::new(
        db_pool.clone(),
        generator,
        staging,
        ProcessorConfig {
            batch_size: config.job_batch_size,
            stuck_timeout_minutes: config.stuck_job_timeout_minutes,
        },
    );

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut last_housekeeping = Instant::now();

    tracing::info!(
        batch_size = config.job_batch_size,
        stuck_timeout_minutes = config.stuck_job_timeout_minutes,
        "Worker ready, starting batch loop"
    );

    // Main processing loop. Overlapping workers are safe: the job store's
    // atomic claim hands each queued job to exactly one of them.
    loop {
        match processor.run_batch().await {
            Ok(outcome) => {
                if let Ok(depth) = queries::queued_depth(&db_pool).await {
                    metrics::gauge!("generation_queue_depth").set(depth as f64);
                }

                if outcome.did_work() {
                    tracing::debug!(
                        reaped = outcome.reaped,
                        claimed = outcome.claimed,
                        completed = outcome.completed,
                        failed = outcome.failed,
                        "Batch processed, checking for more work"
                    );
                } else {
                    tracing::trace!("No jobs available, sleeping");
                    sleep(poll_interval).await;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Batch processing failed, will retry");
                sleep(poll_interval).await;
            }
        }

        if last_housekeeping.elapsed() >= HOUSEKEEPING_INTERVAL {
            match queries::delete_old_jobs(&db_pool, config.job_retention_days).await {
                Ok(0) => {}
                Ok(purged) => {
                    tracing::info!(purged, days = config.job_retention_days, "Purged old terminal jobs");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Old-job purge failed");
                }
            }
            last_housekeeping = Instant::now();
        }
    }
}
