use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{media::MediaStore, staging::StagingArea};

/// Shared application state passed to all route handlers.
///
/// The Gemini client lives in the worker process, not here: the API only
/// stages inputs and enqueues job rows.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub staging: Arc<StagingArea>,
    pub media: Arc<MediaStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        staging: Arc<StagingArea>,
        media: Arc<MediaStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            staging,
            media,
            config,
        }
    }
}
