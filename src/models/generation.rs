use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::Visibility;

/// Submission metadata accompanying the uploaded photos.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitOptions {
    #[garde(range(min = 1))]
    pub user_id: i64,

    #[garde(skip)]
    pub visibility: Visibility,
}

/// Response after submitting photos for generation.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Response for querying generation job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: i32,
    pub progress_stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error body returned for rejected submissions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
