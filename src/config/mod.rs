use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Gemini API key
    pub gemini_api_key: String,

    /// Gemini model used for try-on composition
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Root directory for job-scoped staged input files
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Root directory for generated result images
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Maximum queued jobs claimed per processor tick
    #[serde(default = "default_job_batch_size")]
    pub job_batch_size: i64,

    /// Minutes a job may sit in `processing` before the reaper force-fails it
    #[serde(default = "default_stuck_job_timeout")]
    pub stuck_job_timeout_minutes: i32,

    /// Worker poll interval when the queue is empty
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-file upload size ceiling
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Maximum standing photos per submission
    #[serde(default = "default_max_standing_photos")]
    pub max_standing_photos: usize,

    /// Terminal jobs older than this are purged by worker housekeeping
    #[serde(default = "default_job_retention_days")]
    pub job_retention_days: i32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("data/generated")
}

fn default_job_batch_size() -> i64 {
    10
}

fn default_stuck_job_timeout() -> i32 {
    10
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_standing_photos() -> usize {
    5
}

fn default_job_retention_days() -> i32 {
    7
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
