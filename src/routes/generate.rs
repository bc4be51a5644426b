use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use garde::Validate;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{error, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::generation::{
    ErrorResponse, JobStatusResponse, SubmitOptions, SubmitResponse,
};
use crate::models::job::{JobStatus, Visibility};
use crate::services::staging::UploadedPhoto;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// POST /api/v1/generate — Submit photos for try-on generation.
///
/// Multipart fields: `standing_photos` (1-5 files), `outfit_photo` (one
/// file), `user_id`, optional `visibility` (`public` default). Validation
/// errors are the only synchronous failures a caller sees; everything
/// else happens asynchronously against the job record.
pub async fn submit_generation(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut standing_photos: Vec<UploadedPhoto> = Vec::new();
    let mut outfit_photo: Option<UploadedPhoto> = None;
    let mut user_id: Option<i64> = None;
    let mut visibility = Visibility::Public;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Malformed multipart body"))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("standing_photos") => {
                let name = field.file_name().unwrap_or("standing.jpg").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Failed to read upload"))?;
                standing_photos.push(validate_photo(&state, name, &data)?);
            }
            Some("outfit_photo") => {
                let name = field.file_name().unwrap_or("outfit.jpg").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Failed to read upload"))?;
                outfit_photo = Some(validate_photo(&state, name, &data)?);
            }
            Some("user_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Failed to read user_id"))?;
                user_id = Some(text.trim().parse().map_err(|_| {
                    api_error(StatusCode::BAD_REQUEST, "user_id must be an integer")
                })?);
            }
            Some("visibility") => {
                let text = field.text().await.map_err(|_| {
                    api_error(StatusCode::BAD_REQUEST, "Failed to read visibility")
                })?;
                visibility = Visibility::from_str(text.trim()).map_err(|_| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        "visibility must be 'public' or 'private'",
                    )
                })?;
            }
            _ => {}
        }
    }

    let user_id = user_id
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "user_id is required"))?;
    let options = SubmitOptions {
        user_id,
        visibility,
    };
    options
        .validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    if standing_photos.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "At least one standing photo is required",
        ));
    }
    if standing_photos.len() > state.config.max_standing_photos {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "Maximum {} standing photos allowed",
                state.config.max_standing_photos
            ),
        ));
    }
    let outfit_photo = outfit_photo
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Outfit photo is required"))?;

    // Resubmitting identical inputs inside the dedupe window returns the
    // original job instead of enqueueing a duplicate.
    let input_hash = submission_hash(user_id, visibility, &standing_photos, &outfit_photo);
    match queries::find_recent_duplicate(&state.db, user_id, &input_hash).await {
        Ok(Some((job_id, status))) => {
            info!(job_id = %job_id, owner_id = user_id, status = %status, "Returning existing job for duplicate submission");
            return Ok((
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    job_id,
                    status: status.to_string(),
                    message: "Duplicate submission; returning existing job".to_string(),
                }),
            ));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Duplicate-submission lookup failed");
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to queue generation job",
            ));
        }
    }

    // Stage inputs before the row exists: the processor must never depend
    // on the original upload's lifetime.
    let job_id = Uuid::new_v4();
    let payload = state
        .staging
        .stage(job_id, &standing_photos, &outfit_photo)
        .await
        .map_err(|e| {
            error!(job_id = %job_id, error = %e, "Failed to stage uploaded files");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store uploaded files",
            )
        })?;

    match queries::create_job(&state.db, job_id, user_id, visibility, &payload, &input_hash).await
    {
        Ok(job) => {
            metrics::counter!("generation_jobs_submitted").increment(1);
            info!(
                job_id = %job.id,
                owner_id = user_id,
                standing_photos = payload.standing_photos.len(),
                visibility = %visibility,
                "Generation job queued"
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    job_id: job.id,
                    status: job.status.to_string(),
                    message: "Photos submitted for generation".to_string(),
                }),
            ))
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to insert generation job");
            state.staging.cleanup(job_id).await;
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to queue generation job",
            ))
        }
    }
}

/// GET /api/v1/generate/{job_id} — Check generation job status.
pub async fn get_generation_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| {
            error!(job_id = %job_id, error = %e, "Job lookup failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Job lookup failed")
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Job not found"))?;

    let eta_seconds = match (job.status, job.started_at) {
        (JobStatus::Processing, Some(started_at)) => {
            match queries::average_completion_seconds(&state.db).await {
                Ok(Some(avg)) => {
                    let elapsed = (Utc::now() - started_at).num_seconds();
                    Some((avg.round() as i64 - elapsed).max(0))
                }
                _ => None,
            }
        }
        _ => None,
    };

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status.to_string(),
        progress: job.progress,
        progress_stage: job.progress_stage.to_string(),
        eta_seconds,
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        result_path: job.result_path,
        error: job.error,
    }))
}

fn validate_photo(
    state: &AppState,
    name: String,
    data: &[u8],
) -> Result<UploadedPhoto, ApiError> {
    if data.len() > state.config.max_upload_bytes {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "{} is too large (max {} MB)",
                name,
                state.config.max_upload_bytes / (1024 * 1024)
            ),
        ));
    }

    // Sniff the actual format; the client's content type is not trusted.
    let format = image::guess_format(data).map_err(|_| {
        api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("{name} is not a valid image"),
        )
    })?;

    Ok(UploadedPhoto {
        original_name: name,
        mime_type: format.to_mime_type().to_string(),
        bytes: data.to_vec(),
    })
}

/// Digest over owner, visibility, and input bytes, for duplicate detection.
fn submission_hash(
    user_id: i64,
    visibility: Visibility,
    standing_photos: &[UploadedPhoto],
    outfit_photo: &UploadedPhoto,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.to_le_bytes());
    hasher.update(visibility.to_string().as_bytes());
    for photo in standing_photos {
        hasher.update(&photo.bytes);
    }
    hasher.update(&outfit_photo.bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(bytes: &[u8]) -> UploadedPhoto {
        UploadedPhoto {
            original_name: "test.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_submission_hash_is_stable() {
        let a = submission_hash(1, Visibility::Public, &[photo(b"s")], &photo(b"o"));
        let b = submission_hash(1, Visibility::Public, &[photo(b"s")], &photo(b"o"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_submission_hash_varies_by_inputs() {
        let base = submission_hash(1, Visibility::Public, &[photo(b"s")], &photo(b"o"));
        assert_ne!(
            base,
            submission_hash(2, Visibility::Public, &[photo(b"s")], &photo(b"o"))
        );
        assert_ne!(
            base,
            submission_hash(1, Visibility::Private, &[photo(b"s")], &photo(b"o"))
        );
        assert_ne!(
            base,
            submission_hash(1, Visibility::Public, &[photo(b"x")], &photo(b"o"))
        );
    }
}
