use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::ScanJob;
use crate::db::types::ScanJobStatus;
use crate::services::grading_store::UnitSelector;
use crate::services::scan_grading::FileOutcome;
use crate::services::spreadsheet_grading::{RowError, SpreadsheetOutcome};

#[derive(Debug, Deserialize)]
pub(crate) struct SpreadsheetGradingQuery {
    pub(crate) round_id: String,
    pub(crate) day: i32,
    pub(crate) grade_level: i32,
    pub(crate) school_id: String,
}

impl From<SpreadsheetGradingQuery> for UnitSelector {
    fn from(query: SpreadsheetGradingQuery) -> Self {
        Self {
            school_id: query.school_id,
            round_id: query.round_id,
            day: query.day,
            grade_level: query.grade_level,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SpreadsheetGradingResponse {
    pub(crate) processed: usize,
    pub(crate) failed: usize,
    pub(crate) errors: Vec<RowError>,
    pub(crate) unmatched_columns: Vec<String>,
}

impl From<SpreadsheetOutcome> for SpreadsheetGradingResponse {
    fn from(outcome: SpreadsheetOutcome) -> Self {
        Self {
            processed: outcome.processed,
            failed: outcome.failed,
            errors: outcome.errors,
            unmatched_columns: outcome.unmatched_columns,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanErrorResponse {
    pub(crate) kind: String,
    pub(crate) message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradedScanResponse {
    pub(crate) result_id: String,
    pub(crate) booklet_id: String,
    pub(crate) student_id: String,
    pub(crate) score: u32,
    pub(crate) max_score: u32,
    pub(crate) percentage: f64,
    pub(crate) low_confidence: bool,
    pub(crate) note: Option<String>,
    /// Base64 PNG.
    pub(crate) overlay: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanFileResponse {
    pub(crate) filename: Option<String>,
    pub(crate) graded: Option<GradedScanResponse>,
    pub(crate) error: Option<ScanErrorResponse>,
}

impl From<FileOutcome> for ScanFileResponse {
    fn from(outcome: FileOutcome) -> Self {
        match outcome.result {
            Ok(scan) => Self {
                filename: outcome.filename,
                graded: Some(GradedScanResponse {
                    result_id: scan.result_id,
                    booklet_id: scan.booklet_id,
                    student_id: scan.student_id,
                    score: scan.score,
                    max_score: scan.max_score,
                    percentage: scan.percentage,
                    low_confidence: scan.low_confidence,
                    note: scan.note,
                    overlay: scan.overlay.map(|png| STANDARD.encode(png)),
                }),
                error: None,
            },
            Err(err) => Self {
                filename: outcome.filename,
                graded: None,
                // Infrastructure details stay in the logs.
                error: Some(ScanErrorResponse {
                    kind: err.kind().to_string(),
                    message: if err.is_terminal() {
                        err.to_string()
                    } else {
                        "internal error while grading the scan".to_string()
                    },
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanBatchResponse {
    pub(crate) processed: usize,
    pub(crate) failed: usize,
    pub(crate) files: Vec<ScanFileResponse>,
}

impl ScanBatchResponse {
    pub(crate) fn new(outcomes: Vec<FileOutcome>) -> Self {
        let files: Vec<ScanFileResponse> = outcomes.into_iter().map(Into::into).collect();
        let failed = files.iter().filter(|file| file.error.is_some()).count();
        Self { processed: files.len() - failed, failed, files }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QueuedScanResponse {
    pub(crate) job_id: String,
    pub(crate) filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueuedScansResponse {
    pub(crate) jobs: Vec<QueuedScanResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanJobResponse {
    pub(crate) id: String,
    pub(crate) filename: Option<String>,
    pub(crate) status: ScanJobStatus,
    pub(crate) attempts: i32,
    pub(crate) error: Option<String>,
    pub(crate) result_id: Option<String>,
    pub(crate) low_confidence: bool,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<ScanJob> for ScanJobResponse {
    fn from(job: ScanJob) -> Self {
        Self {
            id: job.id,
            filename: job.filename,
            status: job.status,
            attempts: job.attempts,
            error: job.error,
            result_id: job.result_id,
            low_confidence: job.low_confidence,
            created_at: format_primitive(job.created_at),
            updated_at: format_primitive(job.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::optical::ScanError;
    use crate::services::scan_grading::{ScanGradingError, ScanOutcome};

    #[test]
    fn batch_response_counts_and_hides_internal_errors() {
        let graded = ScanOutcome {
            result_id: "r-1".into(),
            booklet_id: "b-1".into(),
            student_id: "s-1".into(),
            score: 3,
            max_score: 4,
            percentage: 75.0,
            low_confidence: false,
            note: None,
            overlay: Some(vec![1, 2, 3]),
        };
        let response = ScanBatchResponse::new(vec![
            FileOutcome { filename: Some("a.png".into()), result: Ok(graded) },
            FileOutcome {
                filename: Some("b.png".into()),
                result: Err(ScanGradingError::Scan(ScanError::IdentityNotFound)),
            },
            FileOutcome {
                filename: None,
                result: Err(ScanGradingError::Infrastructure(anyhow::anyhow!("pool timed out"))),
            },
        ]);

        assert_eq!(response.processed, 1);
        assert_eq!(response.failed, 2);
        let overlay = response.files[0].graded.as_ref().and_then(|scan| scan.overlay.clone());
        assert_eq!(overlay.as_deref(), Some("AQID"));

        let terminal = response.files[1].error.as_ref().expect("error");
        assert_eq!(terminal.kind, "identity_not_found");
        let internal = response.files[2].error.as_ref().expect("error");
        assert!(!internal.message.contains("pool"));
    }
}
