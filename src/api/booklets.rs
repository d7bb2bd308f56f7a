use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Booklet;
use crate::repositories;
use crate::schemas::booklet::{
    BookletPreviewResponse, BookletResponse, GenerateBookletsRequest, GenerationReportResponse,
    GradedResultResponse,
};
use crate::services::booklet_generation::{self, GenerationRequest, GenerationRequestError};
use crate::services::booklet_preview;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/rounds/:round_id/booklets/generate", post(generate_booklets))
        .route("/booklets/:booklet_id", get(get_booklet))
        .route("/booklets/:booklet_id/publish", post(publish_booklet))
        .route("/booklets/:booklet_id/results", get(list_results))
}

async fn generate_booklets(
    Path(round_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<GenerateBookletsRequest>,
) -> Result<Json<GenerationReportResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let plan = payload.plan().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = GenerationRequest {
        round_id: round_id.clone(),
        day: payload.day,
        grade_level: payload.grade_level,
        school_ids: payload.school_ids,
        plan,
        seed: payload.seed,
    };
    let outcomes = booklet_generation::generate_round(&state, request)
        .await
        .map_err(map_generation_error)?;

    Ok(Json(GenerationReportResponse::new(round_id, payload.day, outcomes)))
}

fn map_generation_error(error: GenerationRequestError) -> ApiError {
    match error {
        GenerationRequestError::RoundNotFound => {
            ApiError::NotFound("Exam round not found".to_string())
        }
        GenerationRequestError::NoApprovedSections { .. }
        | GenerationRequestError::NoSchools
        | GenerationRequestError::InvalidPlan(_) => ApiError::BadRequest(error.to_string()),
        GenerationRequestError::Storage(err) => {
            ApiError::internal(format!("{err:#}"), "Failed to generate booklets")
        }
    }
}

async fn fetch_booklet(state: &AppState, booklet_id: &str) -> Result<Booklet, ApiError> {
    repositories::booklets::find_by_id(state.db(), booklet_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch booklet"))?
        .ok_or_else(|| ApiError::NotFound("Booklet not found".to_string()))
}

async fn get_booklet(
    Path(booklet_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BookletPreviewResponse>, ApiError> {
    let booklet = fetch_booklet(&state, &booklet_id).await?;
    let sections = booklet_preview::load_preview(state.db(), &booklet)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), "Failed to render booklet preview"))?;

    let positions = sections.iter().map(|section| section.questions.len()).sum();
    Ok(Json(BookletPreviewResponse { booklet: booklet.into(), positions, sections }))
}

async fn publish_booklet(
    Path(booklet_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BookletResponse>, ApiError> {
    let published = repositories::booklets::publish(state.db(), &booklet_id, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to publish booklet"))?;

    match published {
        Some(booklet) => {
            tracing::info!(
                booklet_id = %booklet.id,
                variant = %booklet.variant,
                "Booklet published"
            );
            Ok(Json(booklet.into()))
        }
        None => {
            // Either missing or frozen already; tell the two apart for the caller.
            fetch_booklet(&state, &booklet_id).await?;
            Err(ApiError::Conflict("Booklet is already published".to_string()))
        }
    }
}

async fn list_results(
    Path(booklet_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<GradedResultResponse>>, ApiError> {
    let booklet = fetch_booklet(&state, &booklet_id).await?;
    let rows = repositories::results::list_by_booklet(state.db(), &booklet.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list graded results"))?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}
