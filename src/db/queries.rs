use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{
    GenerationJob, JobStatus, ProgressStage, StagedInputSet, Visibility,
};

const JOB_COLUMNS: &str = "id, owner_id, kind, status, visibility, payload, result_path, error, \
     progress, progress_stage, input_hash, created_at, started_at, completed_at";

fn decode_error(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

fn row_to_job(row: &PgRow) -> Result<GenerationJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|e| decode_error("status", e))?;

    let visibility_str: String = row.try_get("visibility")?;
    let visibility =
        Visibility::from_str(&visibility_str).map_err(|e| decode_error("visibility", e))?;

    let stage_str: String = row.try_get("progress_stage")?;
    let progress_stage =
        ProgressStage::from_str(&stage_str).map_err(|e| decode_error("progress_stage", e))?;

    let payload_value: serde_json::Value = row.try_get("payload")?;
    let payload: StagedInputSet =
        serde_json::from_value(payload_value).map_err(|e| decode_error("payload", e))?;

    Ok(GenerationJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        kind: row.try_get("kind")?,
        status,
        visibility,
        payload,
        result_path: row.try_get("result_path")?,
        error: row.try_get("error")?,
        progress: row.try_get("progress")?,
        progress_stage,
        input_hash: row.try_get("input_hash")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Insert a new generation job in `queued` state.
///
/// The id is generated by the submitter so the staging directory can be
/// created under it before the row exists.
pub async fn create_job(
    pool: &PgPool,
    id: Uuid,
    owner_id: i64,
    visibility: Visibility,
    payload: &StagedInputSet,
    input_hash: &str,
) -> Result<GenerationJob, sqlx::Error> {
    let payload_value =
        serde_json::to_value(payload).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO generation_jobs
            (id, owner_id, kind, status, visibility, payload, progress, progress_stage, input_hash)
        VALUES ($1, $2, 'tryon_generation', 'queued', $3, $4, 5, 'UPLOADED', $5)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner_id)
    .bind(visibility.to_string())
    .bind(payload_value)
    .bind(input_hash)
    .fetch_one(pool)
    .await?;

    row_to_job(&row)
}

/// Look up a recent submission with identical inputs by the same owner.
///
/// Failed jobs are excluded so a user can resubmit after a failure.
pub async fn find_recent_duplicate(
    pool: &PgPool,
    owner_id: i64,
    input_hash: &str,
) -> Result<Option<(Uuid, JobStatus)>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status
        FROM generation_jobs
        WHERE owner_id = $1
          AND input_hash = $2
          AND created_at > NOW() - INTERVAL '5 minutes'
          AND status IN ('queued', 'processing', 'completed')
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(owner_id)
    .bind(input_hash)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => {
            let id: Uuid = r.try_get("id")?;
            let status_str: String = r.try_get("status")?;
            let status =
                JobStatus::from_str(&status_str).map_err(|e| decode_error("status", e))?;
            Ok(Some((id, status)))
        }
        None => Ok(None),
    }
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<GenerationJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Atomically claim up to `batch_size` of the oldest queued jobs.
///
/// The claim is a single conditional update: only rows still `queued` are
/// eligible, and `FOR UPDATE SKIP LOCKED` keeps concurrent processor
/// invocations from claiming the same row. `started_at` is set here,
/// exactly once per job.
pub async fn claim_queued_jobs(
    pool: &PgPool,
    batch_size: i64,
) -> Result<Vec<GenerationJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        UPDATE generation_jobs
        SET status = 'processing',
            started_at = NOW(),
            progress = 10,
            progress_stage = 'PROCESSING'
        WHERE id IN (
            SELECT id FROM generation_jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut jobs = rows
        .iter()
        .map(row_to_job)
        .collect::<Result<Vec<_>, _>>()?;

    // RETURNING does not preserve the subquery order.
    jobs.sort_by_key(|job| job.created_at);
    Ok(jobs)
}

/// Update progress checkpoints for a job still in flight.
pub async fn update_progress(
    pool: &PgPool,
    job_id: Uuid,
    progress: i32,
    stage: ProgressStage,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE generation_jobs
        SET progress = $1, progress_stage = $2
        WHERE id = $3 AND status = 'processing'
        "#,
    )
    .bind(progress)
    .bind(stage.to_string())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Transition a job from `processing` to `completed`.
///
/// Returns whether the transition applied. A `false` return means the row
/// was no longer `processing` (e.g. the reaper got there first); callers
/// must not debit credits in that case.
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    result_path: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE generation_jobs
        SET status = 'completed',
            result_path = $1,
            progress = 100,
            progress_stage = 'COMPLETE',
            completed_at = NOW()
        WHERE id = $2 AND status = 'processing'
        "#,
    )
    .bind(result_path)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Transition a job from `processing` to `failed`.
///
/// Returns whether the transition applied (same ownership rule as
/// [`complete_job`]).
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE generation_jobs
        SET status = 'failed',
            error = $1,
            completed_at = NOW()
        WHERE id = $2 AND status = 'processing'
        "#,
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Force-fail jobs stuck in `processing` beyond the timeout.
///
/// Returns the reaped rows so the caller can release their staged inputs.
/// Idempotent: the transition to `failed` hides a job from later passes.
pub async fn reap_stuck_jobs(
    pool: &PgPool,
    timeout_minutes: i32,
) -> Result<Vec<GenerationJob>, sqlx::Error> {
    let error = format!("Job stuck - timeout after {} minutes", timeout_minutes);

    let rows = sqlx::query(&format!(
        r#"
        UPDATE generation_jobs
        SET status = 'failed',
            error = $1,
            completed_at = NOW()
        WHERE status = 'processing'
          AND started_at < NOW() - make_interval(mins => $2)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(&error)
    .bind(timeout_minutes)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_job).collect()
}

/// Average completion time over the trailing week, for status ETAs.
pub async fn average_completion_seconds(pool: &PgPool) -> Result<Option<f64>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT EXTRACT(EPOCH FROM AVG(completed_at - started_at))::double precision AS avg_seconds
        FROM generation_jobs
        WHERE status = 'completed'
          AND completed_at IS NOT NULL
          AND started_at IS NOT NULL
          AND created_at > NOW() - INTERVAL '7 days'
        "#,
    )
    .fetch_one(pool)
    .await?;

    row.try_get("avg_seconds")
}

/// Current number of queued jobs (for the queue depth gauge).
pub async fn queued_depth(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS depth FROM generation_jobs WHERE status = 'queued'")
        .fetch_one(pool)
        .await?;

    row.try_get("depth")
}

/// Delete terminal jobs older than the retention window.
pub async fn delete_old_jobs(pool: &PgPool, days: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM generation_jobs
        WHERE created_at < NOW() - make_interval(days => $1)
          AND status IN ('completed', 'failed')
        "#,
    )
    .bind(days)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Queue statistics for the ops surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub submitted_24h: i64,
    pub completed_24h: i64,
    pub failed_24h: i64,
}

pub async fn job_stats(pool: &PgPool) -> Result<JobStats, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS count FROM generation_jobs GROUP BY status",
    )
    .fetch_all(pool)
    .await?;

    let mut stats = JobStats::default();
    for row in &rows {
        let status_str: String = row.try_get("status")?;
        let count: i64 = row.try_get("count")?;
        match JobStatus::from_str(&status_str).map_err(|e| decode_error("status", e))? {
            JobStatus::Queued => stats.queued = count,
            JobStatus::Processing => stats.processing = count,
            JobStatus::Completed => stats.completed = count,
            JobStatus::Failed => stats.failed = count,
        }
    }

    let recent = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS submitted_24h,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed_24h,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed_24h
        FROM generation_jobs
        WHERE created_at > NOW() - INTERVAL '24 hours'
        "#,
    )
    .fetch_one(pool)
    .await?;

    stats.submitted_24h = recent.try_get("submitted_24h")?;
    stats.completed_24h = recent.try_get("completed_24h")?;
    stats.failed_24h = recent.try_get("failed_24h")?;

    Ok(stats)
}
