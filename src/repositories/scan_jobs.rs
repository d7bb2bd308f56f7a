use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ScanJob;
use crate::db::types::ScanJobStatus;

pub(crate) const COLUMNS: &str = "\
    id, image_sha256, filename, status, attempts, error, result_id, low_confidence, \
    created_at, updated_at, started_at";

/// A job taken off the queue, with the bytes the worker needs.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ClaimedScan {
    pub(crate) id: String,
    pub(crate) attempts: i32,
    pub(crate) image: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct EnqueueScan<'a> {
    pub(crate) id: &'a str,
    pub(crate) image: &'a [u8],
    pub(crate) image_sha256: &'a str,
    pub(crate) filename: Option<&'a str>,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn enqueue(
    pool: &PgPool,
    params: EnqueueScan<'_>,
) -> Result<ScanJob, sqlx::Error> {
    sqlx::query_as::<_, ScanJob>(&format!(
        "INSERT INTO scan_jobs (id, image, image_sha256, filename, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.image)
    .bind(params.image_sha256)
    .bind(params.filename)
    .bind(ScanJobStatus::Queued)
    .bind(params.now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ScanJob>, sqlx::Error> {
    sqlx::query_as::<_, ScanJob>(&format!("SELECT {COLUMNS} FROM scan_jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Oldest queued job first; concurrent workers never claim the same row.
pub(crate) async fn claim_next(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<ClaimedScan>, sqlx::Error> {
    sqlx::query_as::<_, ClaimedScan>(
        "WITH candidate AS (
            SELECT id FROM scan_jobs
            WHERE status = $1
            ORDER BY created_at, id
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE scan_jobs
        SET status = $2,
            attempts = scan_jobs.attempts + 1,
            started_at = $3,
            updated_at = $3
        FROM candidate
        WHERE scan_jobs.id = candidate.id
        RETURNING scan_jobs.id, scan_jobs.attempts, scan_jobs.image",
    )
    .bind(ScanJobStatus::Queued)
    .bind(ScanJobStatus::Processing)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn complete(
    pool: &PgPool,
    id: &str,
    result_id: &str,
    low_confidence: bool,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE scan_jobs
         SET status = $1, result_id = $2, low_confidence = $3, error = NULL, updated_at = $4
         WHERE id = $5",
    )
    .bind(ScanJobStatus::Completed)
    .bind(result_id)
    .bind(low_confidence)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn fail(
    pool: &PgPool,
    id: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scan_jobs SET status = $1, error = $2, updated_at = $3 WHERE id = $4")
        .bind(ScanJobStatus::Failed)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Puts a job back on the queue after a transient failure.
pub(crate) async fn requeue(
    pool: &PgPool,
    id: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE scan_jobs
         SET status = $1, error = $2, started_at = NULL, updated_at = $3
         WHERE id = $4",
    )
    .bind(ScanJobStatus::Queued)
    .bind(error)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Requeues jobs stuck in processing since before `cutoff`; ones out of attempts fail.
pub(crate) async fn recover_stale(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
    max_attempts: i32,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE scan_jobs
         SET status = CASE WHEN attempts >= $1 THEN $2 ELSE $3 END,
             error = CASE WHEN attempts >= $1 THEN 'worker stopped while processing'
                          ELSE error END,
             started_at = NULL,
             updated_at = $4
         WHERE status = $5 AND started_at < $6",
    )
    .bind(max_attempts)
    .bind(ScanJobStatus::Failed)
    .bind(ScanJobStatus::Queued)
    .bind(now)
    .bind(ScanJobStatus::Processing)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
