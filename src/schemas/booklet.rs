use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Booklet, GradedResultRow};
use crate::db::types::{BookletStatus, GradingSource};
use crate::engine::variants::{GenerationError, VariantPlan, VariantSpec};
use crate::services::booklet_generation::{GeneratedBooklet, UnitOutcome};
use crate::services::booklet_preview::PreviewSection;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct VariantRequest {
    #[validate(length(min = 1, max = 16, message = "variant label must be 1 to 16 characters"))]
    pub(crate) label: String,
    #[serde(default = "default_shuffle")]
    pub(crate) shuffle: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GenerateBookletsRequest {
    #[validate(range(min = 1, message = "day must be positive"))]
    pub(crate) day: i32,
    #[serde(default)]
    #[serde(alias = "gradeLevel")]
    #[validate(range(min = 1, max = 12, message = "grade_level must be between 1 and 12"))]
    pub(crate) grade_level: Option<i32>,
    #[serde(default)]
    #[serde(alias = "schoolIds")]
    pub(crate) school_ids: Option<Vec<String>>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) variants: Option<Vec<VariantRequest>>,
    #[serde(default)]
    pub(crate) seed: Option<u64>,
}

impl GenerateBookletsRequest {
    /// The requested variant plan, or `None` to use the configured labels.
    pub(crate) fn plan(&self) -> Result<Option<VariantPlan>, GenerationError> {
        let Some(variants) = &self.variants else {
            return Ok(None);
        };
        let specs = variants
            .iter()
            .map(|variant| VariantSpec {
                label: variant.label.trim().to_uppercase(),
                shuffle: variant.shuffle,
            })
            .collect();
        VariantPlan::new(specs).map(Some)
    }
}

fn default_shuffle() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub(crate) struct GeneratedBookletResponse {
    pub(crate) id: String,
    pub(crate) variant: String,
    pub(crate) is_master: bool,
    pub(crate) positions: usize,
}

impl From<GeneratedBooklet> for GeneratedBookletResponse {
    fn from(booklet: GeneratedBooklet) -> Self {
        Self {
            id: booklet.id,
            variant: booklet.variant,
            is_master: booklet.is_master,
            positions: booklet.positions,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UnitErrorResponse {
    pub(crate) kind: String,
    pub(crate) message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnitReportResponse {
    pub(crate) school_id: String,
    pub(crate) grade_level: i32,
    pub(crate) booklets: Vec<GeneratedBookletResponse>,
    pub(crate) error: Option<UnitErrorResponse>,
}

impl From<UnitOutcome> for UnitReportResponse {
    fn from(outcome: UnitOutcome) -> Self {
        let (booklets, error) = match outcome.result {
            Ok(booklets) => (booklets.into_iter().map(Into::into).collect(), None),
            Err(err) => (
                Vec::new(),
                Some(UnitErrorResponse { kind: err.kind().to_string(), message: err.to_string() }),
            ),
        };
        Self { school_id: outcome.school_id, grade_level: outcome.grade_level, booklets, error }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerationReportResponse {
    pub(crate) round_id: String,
    pub(crate) day: i32,
    pub(crate) generated_units: usize,
    pub(crate) failed_units: usize,
    pub(crate) units: Vec<UnitReportResponse>,
}

impl GenerationReportResponse {
    pub(crate) fn new(round_id: String, day: i32, outcomes: Vec<UnitOutcome>) -> Self {
        let units: Vec<UnitReportResponse> = outcomes.into_iter().map(Into::into).collect();
        let failed_units = units.iter().filter(|unit| unit.error.is_some()).count();
        Self { round_id, day, generated_units: units.len() - failed_units, failed_units, units }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct BookletResponse {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) round_id: String,
    pub(crate) day: i32,
    pub(crate) grade_level: i32,
    pub(crate) variant: String,
    pub(crate) is_master: bool,
    pub(crate) title: String,
    pub(crate) status: BookletStatus,
    pub(crate) seed: Option<i64>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    pub(crate) published_at: Option<String>,
}

impl From<Booklet> for BookletResponse {
    fn from(booklet: Booklet) -> Self {
        Self {
            id: booklet.id,
            school_id: booklet.school_id,
            round_id: booklet.round_id,
            day: booklet.day,
            grade_level: booklet.grade_level,
            variant: booklet.variant,
            is_master: booklet.is_master,
            title: booklet.title,
            status: booklet.status,
            seed: booklet.seed,
            created_at: format_primitive(booklet.created_at),
            updated_at: format_primitive(booklet.updated_at),
            published_at: booklet.published_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct BookletPreviewResponse {
    #[serde(flatten)]
    pub(crate) booklet: BookletResponse,
    pub(crate) positions: usize,
    pub(crate) sections: Vec<PreviewSection>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradedResultResponse {
    pub(crate) id: String,
    pub(crate) booklet_id: String,
    pub(crate) student_id: String,
    pub(crate) score: i32,
    pub(crate) max_score: i32,
    pub(crate) percentage: f64,
    pub(crate) per_position: serde_json::Value,
    pub(crate) per_subject: serde_json::Value,
    pub(crate) low_confidence: bool,
    pub(crate) source: GradingSource,
    pub(crate) updated_at: String,
}

impl From<GradedResultRow> for GradedResultResponse {
    fn from(row: GradedResultRow) -> Self {
        Self {
            id: row.id,
            booklet_id: row.booklet_id,
            student_id: row.student_id,
            score: row.score,
            max_score: row.max_score,
            percentage: row.percentage,
            per_position: row.per_position.0,
            per_subject: row.per_subject.0,
            low_confidence: row.low_confidence,
            source: row.source,
            updated_at: format_primitive(row.updated_at),
        }
    }
}
