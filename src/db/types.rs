use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "questiondifficulty", rename_all = "lowercase")]
pub(crate) enum QuestionDifficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "sectionstatus", rename_all = "lowercase")]
pub(crate) enum SectionStatus {
    Draft,
    Review,
    Approved,
}

/// A published booklet is frozen together with its answer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "bookletstatus", rename_all = "lowercase")]
pub(crate) enum BookletStatus {
    Draft,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "gradingsource", rename_all = "lowercase")]
pub(crate) enum GradingSource {
    Spreadsheet,
    Optical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "scanjobstatus", rename_all = "lowercase")]
pub(crate) enum ScanJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}
