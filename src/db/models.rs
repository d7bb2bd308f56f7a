use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{BookletStatus, GradingSource, ScanJobStatus, SectionStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionOptionRow {
    pub(crate) id: i64,
    pub(crate) question_id: i64,
    pub(crate) text: String,
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamRound {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) number: i32,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct School {
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Student {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) external_ref: String,
    pub(crate) full_name: String,
    pub(crate) grade_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Section {
    pub(crate) id: String,
    pub(crate) round_id: String,
    pub(crate) subject_id: i64,
    pub(crate) grade_level: i32,
    pub(crate) day: i32,
    pub(crate) status: SectionStatus,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Booklet {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) round_id: String,
    pub(crate) day: i32,
    pub(crate) grade_level: i32,
    pub(crate) variant: String,
    pub(crate) is_master: bool,
    pub(crate) title: String,
    /// Persisted key map, keyed by stringified position.
    pub(crate) answer_key: Json<serde_json::Value>,
    pub(crate) seed: Option<i64>,
    pub(crate) status: BookletStatus,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) published_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradedResultRow {
    pub(crate) id: String,
    pub(crate) booklet_id: String,
    pub(crate) student_id: String,
    pub(crate) score: i32,
    pub(crate) max_score: i32,
    pub(crate) percentage: f64,
    pub(crate) per_position: Json<serde_json::Value>,
    pub(crate) per_subject: Json<serde_json::Value>,
    pub(crate) low_confidence: bool,
    pub(crate) source: GradingSource,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// Queue row without the image bytes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ScanJob {
    pub(crate) id: String,
    pub(crate) image_sha256: String,
    pub(crate) filename: Option<String>,
    pub(crate) status: ScanJobStatus,
    pub(crate) attempts: i32,
    pub(crate) error: Option<String>,
    pub(crate) result_id: Option<String>,
    pub(crate) low_confidence: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) started_at: Option<PrimitiveDateTime>,
}
