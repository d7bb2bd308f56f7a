use sqlx::PgPool;

use crate::db::models::Section;
use crate::db::types::SectionStatus;

pub(crate) const COLUMNS: &str =
    "id, round_id, subject_id, grade_level, day, status, created_at";

/// An approved section with the subject fields generation orders by.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ApprovedSection {
    pub(crate) section_id: String,
    pub(crate) grade_level: i32,
    pub(crate) subject_code: String,
    pub(crate) sort_order: i32,
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Section>, sqlx::Error> {
    sqlx::query_as::<_, Section>(&format!("SELECT {COLUMNS} FROM sections WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_approved(
    pool: &PgPool,
    round_id: &str,
    day: i32,
    grade_level: Option<i32>,
) -> Result<Vec<ApprovedSection>, sqlx::Error> {
    sqlx::query_as::<_, ApprovedSection>(
        "SELECT s.id AS section_id, s.grade_level, sub.code AS subject_code, sub.sort_order
         FROM sections s
         JOIN subjects sub ON sub.id = s.subject_id
         WHERE s.round_id = $1
           AND s.day = $2
           AND s.status = $3
           AND ($4::INTEGER IS NULL OR s.grade_level = $4)
         ORDER BY s.grade_level, sub.sort_order, sub.code",
    )
    .bind(round_id)
    .bind(day)
    .bind(SectionStatus::Approved)
    .bind(grade_level)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_questions(pool: &PgPool, section_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM section_questions WHERE section_id = $1")
        .bind(section_id)
        .fetch_one(pool)
        .await
}

pub(crate) async fn update_status(
    pool: &PgPool,
    id: &str,
    status: SectionStatus,
) -> Result<Section, sqlx::Error> {
    sqlx::query_as::<_, Section>(&format!(
        "UPDATE sections SET status = $1 WHERE id = $2 RETURNING {COLUMNS}"
    ))
    .bind(status)
    .bind(id)
    .fetch_one(pool)
    .await
}
