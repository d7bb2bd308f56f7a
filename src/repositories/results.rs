use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::GradedResultRow;
use crate::db::types::GradingSource;

pub(crate) const COLUMNS: &str = "\
    id, booklet_id, student_id, score, max_score, percentage, per_position, per_subject, \
    low_confidence, source, created_at, updated_at";

#[derive(Debug)]
pub(crate) struct UpsertResult<'a> {
    pub(crate) id: &'a str,
    pub(crate) booklet_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) score: i32,
    pub(crate) max_score: i32,
    pub(crate) percentage: f64,
    pub(crate) per_position: serde_json::Value,
    pub(crate) per_subject: serde_json::Value,
    pub(crate) low_confidence: bool,
    pub(crate) source: GradingSource,
    pub(crate) now: PrimitiveDateTime,
}

/// At most one result per student and booklet: a regrade overwrites the previous one and
/// keeps its id.
pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    params: UpsertResult<'_>,
) -> Result<GradedResultRow, sqlx::Error> {
    sqlx::query_as::<_, GradedResultRow>(&format!(
        "INSERT INTO graded_results (
            id, booklet_id, student_id, score, max_score, percentage, per_position,
            per_subject, low_confidence, source, created_at, updated_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
         ON CONFLICT (student_id, booklet_id) DO UPDATE
         SET score = EXCLUDED.score,
             max_score = EXCLUDED.max_score,
             percentage = EXCLUDED.percentage,
             per_position = EXCLUDED.per_position,
             per_subject = EXCLUDED.per_subject,
             low_confidence = EXCLUDED.low_confidence,
             source = EXCLUDED.source,
             updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.booklet_id)
    .bind(params.student_id)
    .bind(params.score)
    .bind(params.max_score)
    .bind(params.percentage)
    .bind(Json(params.per_position))
    .bind(Json(params.per_subject))
    .bind(params.low_confidence)
    .bind(params.source)
    .bind(params.now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_by_booklet(
    pool: &PgPool,
    booklet_id: &str,
) -> Result<Vec<GradedResultRow>, sqlx::Error> {
    sqlx::query_as::<_, GradedResultRow>(&format!(
        "SELECT {COLUMNS} FROM graded_results WHERE booklet_id = $1 ORDER BY student_id"
    ))
    .bind(booklet_id)
    .fetch_all(pool)
    .await
}
