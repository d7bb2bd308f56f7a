use anyhow::Context;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::models::Section;
use crate::db::types::SectionStatus;
use crate::engine::validation::{validate_section, SectionReport};
use crate::repositories;
use crate::services::answer_keys::assemble_questions;

#[derive(Debug, Error)]
pub(crate) enum SectionStatusError {
    #[error("section not found")]
    NotFound,
    #[error("cannot move a section from {from:?} to {to:?}")]
    InvalidTransition { from: SectionStatus, to: SectionStatus },
    #[error("a section without questions cannot be sent to review")]
    Empty,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Runs the expert-review checks over a section's questions. `None` when it does not exist.
pub(crate) async fn section_report(
    pool: &PgPool,
    section_id: &str,
) -> anyhow::Result<Option<SectionReport>> {
    let Some(section) = repositories::sections::find_by_id(pool, section_id)
        .await
        .context("Failed to fetch section")?
    else {
        return Ok(None);
    };

    let rows = repositories::questions::list_for_section(pool, &section.id)
        .await
        .context("Failed to load section questions")?;
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let options = repositories::questions::list_options(pool, &ids)
        .await
        .context("Failed to load question options")?;

    Ok(Some(validate_section(&assemble_questions(rows, options))))
}

pub(crate) async fn change_status(
    pool: &PgPool,
    section_id: &str,
    target: SectionStatus,
) -> Result<Section, SectionStatusError> {
    let section = repositories::sections::find_by_id(pool, section_id)
        .await
        .context("Failed to fetch section")?
        .ok_or(SectionStatusError::NotFound)?;

    let question_count = repositories::sections::count_questions(pool, &section.id)
        .await
        .context("Failed to count section questions")?;
    check_transition(section.status, target, question_count)?;

    let updated = repositories::sections::update_status(pool, &section.id, target)
        .await
        .context("Failed to update section status")?;

    tracing::info!(
        section_id = %updated.id,
        from = ?section.status,
        to = ?updated.status,
        "Section status changed"
    );
    Ok(updated)
}

/// Draft goes to review once it has questions, review goes to approved, and anything can be
/// sent back to draft.
pub(crate) fn check_transition(
    from: SectionStatus,
    to: SectionStatus,
    question_count: i64,
) -> Result<(), SectionStatusError> {
    match (from, to) {
        (_, SectionStatus::Draft) => Ok(()),
        (SectionStatus::Draft, SectionStatus::Review) if question_count == 0 => {
            Err(SectionStatusError::Empty)
        }
        (SectionStatus::Draft, SectionStatus::Review)
        | (SectionStatus::Review, SectionStatus::Approved) => Ok(()),
        _ => Err(SectionStatusError::InvalidTransition { from, to }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_workflow_transitions() {
        use SectionStatus::{Approved, Draft, Review};

        assert!(check_transition(Draft, Review, 3).is_ok());
        assert!(matches!(check_transition(Draft, Review, 0), Err(SectionStatusError::Empty)));
        assert!(check_transition(Review, Approved, 3).is_ok());
        assert!(check_transition(Approved, Draft, 3).is_ok());
        assert!(check_transition(Review, Draft, 0).is_ok());

        assert!(matches!(
            check_transition(Draft, Approved, 3),
            Err(SectionStatusError::InvalidTransition { from: Draft, to: Approved })
        ));
        assert!(check_transition(Approved, Review, 3).is_err());
        assert!(check_transition(Review, Review, 3).is_err());
    }
}
