use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Booklet;
use crate::db::types::BookletStatus;

pub(crate) const COLUMNS: &str = "\
    id, school_id, round_id, day, grade_level, variant, is_master, title, answer_key, seed, \
    status, created_at, updated_at, published_at";

/// The (school, round, day, grade) a booklet belongs to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitKey<'a> {
    pub(crate) school_id: &'a str,
    pub(crate) round_id: &'a str,
    pub(crate) day: i32,
    pub(crate) grade_level: i32,
}

#[derive(Debug)]
pub(crate) struct UpsertBooklet<'a> {
    pub(crate) id: &'a str,
    pub(crate) unit: UnitKey<'a>,
    pub(crate) variant: &'a str,
    pub(crate) is_master: bool,
    pub(crate) title: &'a str,
    pub(crate) answer_key: serde_json::Value,
    pub(crate) seed: Option<i64>,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Booklet>, sqlx::Error> {
    sqlx::query_as::<_, Booklet>(&format!("SELECT {COLUMNS} FROM booklets WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Every variant of one unit, master first.
pub(crate) async fn list_for_unit(
    pool: &PgPool,
    unit: UnitKey<'_>,
) -> Result<Vec<Booklet>, sqlx::Error> {
    sqlx::query_as::<_, Booklet>(&format!(
        "SELECT {COLUMNS} FROM booklets
         WHERE school_id = $1 AND round_id = $2 AND day = $3 AND grade_level = $4
         ORDER BY is_master DESC, variant"
    ))
    .bind(unit.school_id)
    .bind(unit.round_id)
    .bind(unit.day)
    .bind(unit.grade_level)
    .fetch_all(pool)
    .await
}

/// Inserts or rewrites a draft booklet. Returns `None` when the existing row is published,
/// which leaves it untouched.
pub(crate) async fn upsert_draft(
    executor: impl sqlx::PgExecutor<'_>,
    params: UpsertBooklet<'_>,
) -> Result<Option<Booklet>, sqlx::Error> {
    sqlx::query_as::<_, Booklet>(&format!(
        "INSERT INTO booklets (
            id, school_id, round_id, day, grade_level, variant, is_master, title, answer_key,
            seed, status, created_at, updated_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
         ON CONFLICT (school_id, round_id, day, grade_level, variant) DO UPDATE
         SET is_master = EXCLUDED.is_master,
             title = EXCLUDED.title,
             answer_key = EXCLUDED.answer_key,
             seed = EXCLUDED.seed,
             updated_at = EXCLUDED.updated_at
         WHERE booklets.status = $11
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.unit.school_id)
    .bind(params.unit.round_id)
    .bind(params.unit.day)
    .bind(params.unit.grade_level)
    .bind(params.variant)
    .bind(params.is_master)
    .bind(params.title)
    .bind(Json(params.answer_key))
    .bind(params.seed)
    .bind(BookletStatus::Draft)
    .bind(params.now)
    .fetch_optional(executor)
    .await
}

/// Freezes a draft. Returns `None` if the booklet is missing or already published.
pub(crate) async fn publish(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<Booklet>, sqlx::Error> {
    sqlx::query_as::<_, Booklet>(&format!(
        "UPDATE booklets SET status = $1, published_at = $2, updated_at = $2
         WHERE id = $3 AND status = $4
         RETURNING {COLUMNS}"
    ))
    .bind(BookletStatus::Published)
    .bind(now)
    .bind(id)
    .bind(BookletStatus::Draft)
    .fetch_optional(pool)
    .await
}
