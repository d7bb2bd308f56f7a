use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::core::state::AppState;
use crate::core::time::{minutes_ago, primitive_now_utc as now_primitive};
use crate::repositories;
use crate::repositories::scan_jobs::ClaimedScan;
use crate::services::scan_grading::{self, ScanGradingError};

/// Jobs left in processing longer than this belong to a worker that died.
const STALE_AFTER_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Requeue,
    Fail,
}

/// Terminal scan errors fail straight away; infrastructure errors retry until attempts run out.
pub(crate) fn disposition(
    error: &ScanGradingError,
    attempts: i32,
    max_attempts: u32,
) -> Disposition {
    if error.is_terminal() || attempts.max(0) as u32 >= max_attempts {
        Disposition::Fail
    } else {
        Disposition::Requeue
    }
}

pub(crate) async fn claim_next_scan(pool: &PgPool) -> Result<Option<ClaimedScan>> {
    repositories::scan_jobs::claim_next(pool, now_primitive())
        .await
        .context("Failed to claim scan job")
}

pub(crate) async fn process_scan_job(state: &AppState, job: ClaimedScan) -> Result<()> {
    let store = state.store();
    let outcome = scan_grading::grade_scan(state.pipeline(), store.as_ref(), job.image).await;

    match outcome {
        Ok(graded) => {
            repositories::scan_jobs::complete(
                state.db(),
                &job.id,
                &graded.result_id,
                graded.low_confidence,
                now_primitive(),
            )
            .await
            .context("Failed to mark scan job completed")?;
            tracing::info!(
                job_id = %job.id,
                booklet_id = %graded.booklet_id,
                student_id = %graded.student_id,
                score = graded.score,
                low_confidence = graded.low_confidence,
                "Scan job graded"
            );
        }
        Err(err) => {
            let message = format!("{err:#}");
            let max_attempts = state.settings().worker().scan_max_attempts;
            match disposition(&err, job.attempts, max_attempts) {
                Disposition::Requeue => {
                    let now = now_primitive();
                    repositories::scan_jobs::requeue(state.db(), &job.id, &message, now)
                        .await
                        .context("Failed to requeue scan job")?;
                    tracing::warn!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        error = %message,
                        "Scan job requeued"
                    );
                }
                Disposition::Fail => {
                    let now = now_primitive();
                    repositories::scan_jobs::fail(state.db(), &job.id, &message, now)
                        .await
                        .context("Failed to mark scan job failed")?;
                    tracing::warn!(
                        job_id = %job.id,
                        kind = err.kind(),
                        error = %message,
                        "Scan job failed"
                    );
                }
            }
        }
    }

    Ok(())
}

pub(crate) async fn recover_stale_scans(state: &AppState) -> Result<()> {
    let max_attempts =
        i32::try_from(state.settings().worker().scan_max_attempts).unwrap_or(i32::MAX);
    let recovered = repositories::scan_jobs::recover_stale(
        state.db(),
        minutes_ago(STALE_AFTER_MINUTES),
        max_attempts,
        now_primitive(),
    )
    .await
    .context("Failed to recover stale scan jobs")?;

    if recovered > 0 {
        tracing::warn!(recovered, "Recovered stale scan jobs");
        metrics::counter!("scan_jobs_recovered_total").increment(recovered);
    }
    Ok(())
}
