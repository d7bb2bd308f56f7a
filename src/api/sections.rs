use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::section::{SectionResponse, SectionStatusUpdate, SectionValidationResponse};
use crate::services::section_validation::{self, SectionStatusError};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:section_id/validation", get(validate_section))
        .route("/:section_id/status", post(update_status))
}

async fn validate_section(
    Path(section_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SectionValidationResponse>, ApiError> {
    let report = section_validation::section_report(state.db(), &section_id)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), "Failed to validate section"))?
        .ok_or_else(|| ApiError::NotFound("Section not found".to_string()))?;

    Ok(Json(SectionValidationResponse { section_id, report }))
}

async fn update_status(
    Path(section_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SectionStatusUpdate>,
) -> Result<Json<SectionResponse>, ApiError> {
    let section = section_validation::change_status(state.db(), &section_id, payload.status)
        .await
        .map_err(|error| match error {
            SectionStatusError::NotFound => ApiError::NotFound("Section not found".to_string()),
            SectionStatusError::InvalidTransition { .. } => ApiError::Conflict(error.to_string()),
            SectionStatusError::Empty => ApiError::BadRequest(error.to_string()),
            SectionStatusError::Storage(err) => {
                ApiError::internal(format!("{err:#}"), "Failed to update section status")
            }
        })?;

    Ok(Json(section.into()))
}
