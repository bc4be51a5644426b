use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::db::{credits, queries};
use crate::models::job::{GenerationJob, ProgressStage, StagedPhoto};
use crate::services::gemini::{GeminiClient, GenerateError, InlineImage};
use crate::services::staging::StagingArea;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Queued jobs claimed per tick.
    pub batch_size: i64,
    /// Minutes in `processing` before a job is considered abandoned.
    pub stuck_timeout_minutes: i32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            stuck_timeout_minutes: 10,
        }
    }
}

/// Counts from one processor tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub reaped: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn did_work(&self) -> bool {
        self.reaped > 0 || self.claimed > 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error("failed to read staged input {path}: {source}")]
    StagedInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("job payload missing {0}")]
    MissingInput(&'static str),

    #[error("job store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Executes claimed generation jobs and owns their terminal transitions.
///
/// All dependencies are injected so batches can run against fakes in tests
/// and multiple worker processes can run concurrently; the job store's
/// atomic claim is the only serialization point.
pub struct JobProcessor {
    db: PgPool,
    generator: Arc<GeminiClient>,
    staging: Arc<StagingArea>,
    config: ProcessorConfig,
}

impl JobProcessor {
    pub fn new(
        db: PgPool,
        generator: Arc<GeminiClient>,
        staging: Arc<StagingArea>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            db,
            generator,
            staging,
            config,
        }
    }

    /// One scheduler tick: reap abandoned jobs, then claim and run a batch.
    ///
    /// Claimed jobs run sequentially, oldest first. A job's failure is
    /// recorded on its row and never aborts the rest of the batch.
    pub async fn run_batch(&self) -> Result<BatchOutcome, sqlx::Error> {
        let mut outcome = BatchOutcome::default();

        outcome.reaped = self.reap_stuck().await?;

        let jobs = queries::claim_queued_jobs(&self.db, self.config.batch_size).await?;
        outcome.claimed = jobs.len();

        for job in jobs {
            if self.execute(job).await {
                outcome.completed += 1;
            } else {
                outcome.failed += 1;
            }
        }

        Ok(outcome)
    }

    /// Run a single claimed job to a terminal state. Returns whether it
    /// completed. Staged inputs are released no matter the outcome.
    async fn execute(&self, job: GenerationJob) -> bool {
        let job_id = job.id;
        let owner_id = job.owner_id;

        info!(job_id = %job_id, owner_id, visibility = %job.visibility, "Processing generation job");
        let started = Instant::now();

        let completed = match self.generate(&job).await {
            Ok(result_path) => {
                self.record_success(&job, &result_path).await
            }
            Err(e) => {
                error!(job_id = %job_id, owner_id, error = %e, "Generation job failed");
                match queries::fail_job(&self.db, job_id, &e.to_string()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(job_id = %job_id, "Job was no longer processing when failure was recorded");
                    }
                    Err(db_err) => {
                        error!(job_id = %job_id, error = %db_err, "Failed to record job failure");
                    }
                }
                metrics::counter!("generation_jobs_failed").increment(1);
                false
            }
        };

        if completed {
            metrics::counter!("generation_jobs_completed").increment(1);
            metrics::histogram!("generation_processing_seconds")
                .record(started.elapsed().as_secs_f64());
            info!(
                job_id = %job_id,
                owner_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job completed successfully"
            );
        }

        // Terminal either way: the staged input set is gone after this.
        self.staging.cleanup(job_id).await;

        completed
    }

    /// Reconstruct the staged attachments and run the generation call.
    async fn generate(&self, job: &GenerationJob) -> Result<String, ProcessError> {
        queries::update_progress(&self.db, job.id, 30, ProgressStage::Processing).await?;

        let standing = job
            .payload
            .standing_photos
            .first()
            .ok_or(ProcessError::MissingInput("standing photo"))?;

        let attachments = vec![
            read_staged_photo(standing).await?,
            read_staged_photo(&job.payload.outfit_photo).await?,
        ];

        let result_path = self.generator.generate_try_on(&attachments).await?;

        queries::update_progress(&self.db, job.id, 90, ProgressStage::Postprocessing).await?;

        Ok(result_path)
    }

    /// Record a successful generation and bill for it.
    ///
    /// The debit happens only if this invocation won the terminal
    /// transition, which is what bounds it to at most once per job. A debit
    /// failure is an anomaly to log, never a reason to fail a job whose
    /// result was already delivered.
    async fn record_success(&self, job: &GenerationJob, result_path: &str) -> bool {
        let transitioned = match queries::complete_job(&self.db, job.id, result_path).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job completion");
                false
            }
        };

        if !transitioned {
            warn!(
                job_id = %job.id,
                "Job no longer processing at completion (likely reaped); skipping credit debit"
            );
            return false;
        }

        if let Err(e) = credits::debit(&self.db, job.owner_id, job.visibility).await {
            error!(
                job_id = %job.id,
                owner_id = job.owner_id,
                error = %e,
                "Job completed but credit debit failed"
            );
            metrics::counter!("credit_debit_failures").increment(1);
        }

        true
    }

    /// Force-fail jobs abandoned in `processing` and release their staging.
    ///
    /// Pure recovery: no credit side effects. Safe to run on every tick.
    async fn reap_stuck(&self) -> Result<usize, sqlx::Error> {
        let reaped =
            queries::reap_stuck_jobs(&self.db, self.config.stuck_timeout_minutes).await?;

        if reaped.is_empty() {
            return Ok(0);
        }

        warn!(
            count = reaped.len(),
            timeout_minutes = self.config.stuck_timeout_minutes,
            "Reaped stuck generation jobs"
        );

        for job in &reaped {
            warn!(
                job_id = %job.id,
                owner_id = job.owner_id,
                started_at = ?job.started_at,
                "Job force-failed after processing timeout"
            );
            self.staging.cleanup(job.id).await;
        }

        metrics::counter!("generation_jobs_reaped").increment(reaped.len() as u64);
        Ok(reaped.len())
    }
}

async fn read_staged_photo(photo: &StagedPhoto) -> Result<InlineImage, ProcessError> {
    let bytes = tokio::fs::read(&photo.path)
        .await
        .map_err(|source| ProcessError::StagedInput {
            path: photo.path.clone(),
            source,
        })?;

    Ok(InlineImage {
        bytes,
        mime_type: photo.mime_type.clone(),
    })
}
