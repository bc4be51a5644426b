use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a generation job in the async queue.
///
/// Transitions are forward-only: `queued -> processing -> {completed, failed}`.
/// A job never re-enters `queued` after leaving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Whether the generated result may appear in the public gallery.
///
/// Public generations bill at the discounted tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Credit cost of one completed generation at this tier.
    pub fn credit_cost(self) -> f64 {
        match self {
            Visibility::Public => 0.5,
            Visibility::Private => 1.0,
        }
    }

    pub fn debit_description(self) -> &'static str {
        match self {
            Visibility::Public => "Public AI generation (0.5 credits)",
            Visibility::Private => "Private AI generation (1 credit)",
        }
    }
}

/// Coarse progress checkpoints surfaced by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStage {
    Uploaded,
    Processing,
    Postprocessing,
    Complete,
}

/// One input image copied into the job's staging directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedPhoto {
    pub path: PathBuf,
    pub mime_type: String,
    pub original_name: String,
}

/// Job-scoped copies of the uploaded inputs.
///
/// Created before the job is enqueued and deleted unconditionally once the
/// job reaches a terminal state. The processor only ever reads from here,
/// never from the original upload location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedInputSet {
    pub temp_dir: PathBuf,
    pub standing_photos: Vec<StagedPhoto>,
    pub outfit_photo: StagedPhoto,
}

/// A try-on generation job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub owner_id: i64,
    pub kind: String,
    pub status: JobStatus,
    pub visibility: Visibility,
    pub payload: StagedInputSet,
    pub result_path: Option<String>,
    pub error: Option<String>,
    pub progress: i32,
    pub progress_stage: ProgressStage,
    pub input_hash: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(JobStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_credit_tiers() {
        assert_eq!(Visibility::Public.credit_cost(), 0.5);
        assert_eq!(Visibility::Private.credit_cost(), 1.0);
    }

    #[test]
    fn test_progress_stage_wire_format() {
        assert_eq!(ProgressStage::Postprocessing.to_string(), "POSTPROCESSING");
        assert_eq!(
            ProgressStage::from_str("UPLOADED").unwrap(),
            ProgressStage::Uploaded
        );
    }
}
