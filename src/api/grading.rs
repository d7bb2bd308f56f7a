use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::validation::{
    read_file_parts, validate_scan_upload, validate_spreadsheet_upload, UploadedFile,
};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::repositories::scan_jobs::EnqueueScan;
use crate::schemas::grading::{
    QueuedScanResponse, QueuedScansResponse, ScanBatchResponse, ScanJobResponse,
    SpreadsheetGradingQuery, SpreadsheetGradingResponse,
};
use crate::services::grading_store::UnitSelector;
use crate::services::scan_grading::{self, ScanUpload};
use crate::services::spreadsheet_grading::{self, SpreadsheetGradingError};

pub(crate) fn router(body_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/spreadsheet", post(grade_spreadsheet))
        .route("/scans", post(grade_scans))
        .route("/scans/queue", post(queue_scans))
        .route("/scans/jobs/:job_id", get(get_scan_job))
        .layer(DefaultBodyLimit::max(body_limit))
}

async fn grade_spreadsheet(
    Query(query): Query<SpreadsheetGradingQuery>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SpreadsheetGradingResponse>, ApiError> {
    let max_bytes = state.settings().uploads().max_upload_bytes();
    let mut files = read_file_parts(&mut multipart, max_bytes, 1).await?;
    let file = files.remove(0);
    validate_spreadsheet_upload(file.filename.as_deref())?;

    let unit = UnitSelector::from(query);
    let store = state.store();
    let outcome = spreadsheet_grading::grade_spreadsheet(store.as_ref(), &unit, &file.bytes)
        .await
        .map_err(|error| match error {
            SpreadsheetGradingError::NoBooklets => ApiError::NotFound(error.to_string()),
            SpreadsheetGradingError::NoMaster | SpreadsheetGradingError::NotPublished { .. } => {
                ApiError::Conflict(error.to_string())
            }
            SpreadsheetGradingError::Spreadsheet(err) => ApiError::BadRequest(err.to_string()),
            SpreadsheetGradingError::Storage(err) => {
                ApiError::internal(format!("{err:#}"), "Failed to grade spreadsheet")
            }
        })?;

    Ok(Json(outcome.into()))
}

async fn read_scans(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<Vec<UploadedFile>, ApiError> {
    let uploads = state.settings().uploads();
    let files =
        read_file_parts(multipart, uploads.max_upload_bytes(), uploads.max_scans_per_batch)
            .await?;
    for file in &files {
        validate_scan_upload(file.filename.as_deref(), &uploads.allowed_scan_extensions)?;
    }
    Ok(files)
}

async fn grade_scans(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ScanBatchResponse>, ApiError> {
    let files = read_scans(&state, &mut multipart).await?;
    let uploads = files
        .into_iter()
        .map(|file| ScanUpload { filename: file.filename, bytes: file.bytes })
        .collect();

    let outcomes = scan_grading::grade_scans(
        state.pipeline(),
        state.store(),
        uploads,
        state.settings().worker().scan_concurrency,
    )
    .await;

    Ok(Json(ScanBatchResponse::new(outcomes)))
}

async fn queue_scans(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<QueuedScansResponse>, ApiError> {
    let files = read_scans(&state, &mut multipart).await?;

    let mut jobs = Vec::with_capacity(files.len());
    for file in files {
        let id = Uuid::new_v4().to_string();
        let digest = hex::encode(Sha256::digest(&file.bytes));
        let job = repositories::scan_jobs::enqueue(
            state.db(),
            EnqueueScan {
                id: &id,
                image: &file.bytes,
                image_sha256: &digest,
                filename: file.filename.as_deref(),
                now: primitive_now_utc(),
            },
        )
        .await
        .map_err(|e| ApiError::internal(e, "Failed to queue scan"))?;

        metrics::counter!("scans_queued_total").increment(1);
        jobs.push(QueuedScanResponse { job_id: job.id, filename: job.filename });
    }

    tracing::info!(jobs = jobs.len(), "Scans queued");
    Ok(Json(QueuedScansResponse { jobs }))
}

async fn get_scan_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ScanJobResponse>, ApiError> {
    let job = repositories::scan_jobs::find_by_id(state.db(), &job_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch scan job"))?
        .ok_or_else(|| ApiError::NotFound("Scan job not found".to_string()))?;

    Ok(Json(job.into()))
}
