//! Integration tests for the job store, ledger, and staging lifecycle.
//!
//! These require a running PostgreSQL instance configured via environment
//! variables (DATABASE_URL et al.). They share one job table, so run them
//! serially:
//!
//!   cargo test --test integration_test -- --ignored --test-threads=1

use picfit::{
    config::AppConfig,
    db::{self, credits, queries},
    models::job::{JobStatus, Visibility},
    services::staging::{StagingArea, UploadedPhoto},
};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> PgPool {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn create_test_user(pool: &PgPool, starting_credits: f64) -> i64 {
    let email = format!("test-{}@picfit.test", Uuid::new_v4());
    sqlx::query_scalar(
        "INSERT INTO users (email, credits_remaining) VALUES ($1, $2) RETURNING id",
    )
    .bind(email)
    .bind(starting_credits)
    .fetch_one(pool)
    .await
    .expect("Failed to create test user")
}

fn photo(name: &str, bytes: &[u8]) -> UploadedPhoto {
    UploadedPhoto {
        original_name: name.to_string(),
        mime_type: "image/jpeg".to_string(),
        bytes: bytes.to_vec(),
    }
}

async fn stage_and_submit(
    pool: &PgPool,
    staging: &StagingArea,
    owner_id: i64,
    visibility: Visibility,
) -> picfit::models::job::GenerationJob {
    let job_id = Uuid::new_v4();
    let payload = staging
        .stage(
            job_id,
            &[photo("front.jpg", b"standing bytes")],
            &photo("flatlay.jpg", b"outfit bytes"),
        )
        .await
        .expect("Failed to stage inputs");

    queries::create_job(
        pool,
        job_id,
        owner_id,
        visibility,
        &payload,
        &format!("hash-{job_id}"),
    )
    .await
    .expect("Failed to create job")
}

async fn debit_count(pool: &PgPool, user_id: i64) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1 AND kind = 'debit'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .expect("Failed to count debits")
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_job_lifecycle_to_completed() {
    let pool = test_pool().await;
    let staging_dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::init(staging_dir.path()).await.unwrap();
    let owner = create_test_user(&pool, 10.0).await;

    // Submit
    let job = stage_and_submit(&pool, &staging, owner, Visibility::Public).await;
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.started_at.is_none());
    assert!(job.result_path.is_none() && job.error.is_none());

    // Claim
    let claimed = queries::claim_queued_jobs(&pool, 10).await.unwrap();
    let claimed_job = claimed
        .iter()
        .find(|j| j.id == job.id)
        .expect("job should be claimed");
    assert_eq!(claimed_job.status, JobStatus::Processing);
    assert!(claimed_job.started_at.is_some());

    // The queued -> processing gate is one-way
    let reclaimed = queries::claim_queued_jobs(&pool, 10).await.unwrap();
    assert!(reclaimed.iter().all(|j| j.id != job.id));

    // Complete exactly once
    assert!(queries::complete_job(&pool, job.id, "/generated/fit_test.png")
        .await
        .unwrap());
    assert!(!queries::complete_job(&pool, job.id, "/generated/fit_other.png")
        .await
        .unwrap());
    assert!(!queries::fail_job(&pool, job.id, "too late").await.unwrap());

    let done = queries::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result_path.as_deref(), Some("/generated/fit_test.png"));
    assert!(done.error.is_none());
    assert!(done.completed_at.is_some());

    // One debit at the public tier
    credits::debit(&pool, owner, Visibility::Public).await.unwrap();
    assert_eq!(credits::balance(&pool, owner).await.unwrap(), 9.5);
    assert_eq!(debit_count(&pool, owner).await, 1);

    // Staged inputs released
    staging.cleanup(job.id).await;
    assert!(!staging_dir.path().join(job.id.to_string()).exists());
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_concurrent_claims_have_single_winner() {
    let pool = test_pool().await;
    let staging_dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::init(staging_dir.path()).await.unwrap();
    let owner = create_test_user(&pool, 10.0).await;

    let job = stage_and_submit(&pool, &staging, owner, Visibility::Public).await;

    let (a, b) = futures::join!(
        queries::claim_queued_jobs(&pool, 10),
        queries::claim_queued_jobs(&pool, 10)
    );

    let a_won = a.unwrap().iter().any(|j| j.id == job.id);
    let b_won = b.unwrap().iter().any(|j| j.id == job.id);
    assert!(
        a_won ^ b_won,
        "exactly one claimant should win the job (a: {a_won}, b: {b_won})"
    );
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_failed_job_records_error_and_no_debit() {
    let pool = test_pool().await;
    let staging_dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::init(staging_dir.path()).await.unwrap();
    let owner = create_test_user(&pool, 10.0).await;

    let job = stage_and_submit(&pool, &staging, owner, Visibility::Private).await;
    queries::claim_queued_jobs(&pool, 10).await.unwrap();

    assert!(queries::fail_job(&pool, job.id, "Gemini API error: HTTP 500 - boom")
        .await
        .unwrap());

    let failed = queries::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("HTTP 500"));
    assert!(failed.result_path.is_none());
    assert_eq!(debit_count(&pool, owner).await, 0);
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_reaper_force_fails_stuck_jobs_once() {
    let pool = test_pool().await;
    let staging_dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::init(staging_dir.path()).await.unwrap();
    let owner = create_test_user(&pool, 10.0).await;

    let job = stage_and_submit(&pool, &staging, owner, Visibility::Public).await;
    queries::claim_queued_jobs(&pool, 10).await.unwrap();

    // Backdate the claim so the job looks abandoned
    sqlx::query(
        "UPDATE generation_jobs SET started_at = NOW() - INTERVAL '11 minutes' WHERE id = $1",
    )
    .bind(job.id)
    .execute(&pool)
    .await
    .unwrap();

    let reaped = queries::reap_stuck_jobs(&pool, 10).await.unwrap();
    let reaped_job = reaped
        .iter()
        .find(|j| j.id == job.id)
        .expect("stuck job should be reaped");
    assert_eq!(reaped_job.status, JobStatus::Failed);
    assert!(reaped_job
        .error
        .as_deref()
        .unwrap()
        .contains("timeout after 10 minutes"));

    // Idempotent: a second pass sees nothing to reap
    let second = queries::reap_stuck_jobs(&pool, 10).await.unwrap();
    assert!(second.iter().all(|j| j.id != job.id));

    // Recovery never bills
    assert_eq!(debit_count(&pool, owner).await, 0);
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_insufficient_credits_rolls_back() {
    let pool = test_pool().await;
    let owner = create_test_user(&pool, 0.25).await;

    let result = credits::debit(&pool, owner, Visibility::Public).await;
    assert!(matches!(
        result,
        Err(credits::LedgerError::InsufficientCredits { .. })
    ));

    // Neither the balance nor the ledger moved
    assert_eq!(credits::balance(&pool, owner).await.unwrap(), 0.25);
    assert_eq!(debit_count(&pool, owner).await, 0);

    // Topping up unblocks the debit
    credits::grant(&pool, owner, 1.0, "Support adjustment")
        .await
        .unwrap();
    credits::debit(&pool, owner, Visibility::Public).await.unwrap();
    assert_eq!(credits::balance(&pool, owner).await.unwrap(), 0.75);
    assert_eq!(debit_count(&pool, owner).await, 1);
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_duplicate_submission_returns_existing_job() {
    let pool = test_pool().await;
    let staging_dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::init(staging_dir.path()).await.unwrap();
    let owner = create_test_user(&pool, 10.0).await;

    let job_id = Uuid::new_v4();
    let payload = staging
        .stage(job_id, &[photo("a.jpg", b"a")], &photo("b.jpg", b"b"))
        .await
        .unwrap();
    queries::create_job(&pool, job_id, owner, Visibility::Public, &payload, "same-hash")
        .await
        .unwrap();

    let duplicate = queries::find_recent_duplicate(&pool, owner, "same-hash")
        .await
        .unwrap();
    assert_eq!(duplicate, Some((job_id, JobStatus::Queued)));

    // A failed attempt does not block resubmission
    queries::claim_queued_jobs(&pool, 10).await.unwrap();
    queries::fail_job(&pool, job_id, "boom").await.unwrap();
    let after_failure = queries::find_recent_duplicate(&pool, owner, "same-hash")
        .await
        .unwrap();
    assert_eq!(after_failure, None);
}
