use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::Section;
use crate::db::types::SectionStatus;
use crate::engine::validation::SectionReport;

#[derive(Debug, Deserialize)]
pub(crate) struct SectionStatusUpdate {
    pub(crate) status: SectionStatus,
}

#[derive(Debug, Serialize)]
pub(crate) struct SectionResponse {
    pub(crate) id: String,
    pub(crate) round_id: String,
    pub(crate) subject_id: i64,
    pub(crate) grade_level: i32,
    pub(crate) day: i32,
    pub(crate) status: SectionStatus,
    pub(crate) created_at: String,
}

impl From<Section> for SectionResponse {
    fn from(section: Section) -> Self {
        Self {
            id: section.id,
            round_id: section.round_id,
            subject_id: section.subject_id,
            grade_level: section.grade_level,
            day: section.day,
            status: section.status,
            created_at: format_primitive(section.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SectionValidationResponse {
    pub(crate) section_id: String,
    #[serde(flatten)]
    pub(crate) report: SectionReport,
}
