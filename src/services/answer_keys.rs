use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::db::models::{Booklet, QuestionOptionRow};
use crate::engine::answer_key::{AnswerKeyMap, PersistedKeyMap, QuestionId};
use crate::engine::pool::{AnswerOption, Question};
use crate::repositories;
use crate::repositories::questions::QuestionSubjectRow;

/// Joins question rows with their options, keeping the row order.
pub(crate) fn assemble_questions(
    rows: Vec<QuestionSubjectRow>,
    options: Vec<QuestionOptionRow>,
) -> Vec<Question> {
    let mut by_question: HashMap<i64, Vec<AnswerOption>> = HashMap::new();
    for option in options {
        by_question.entry(option.question_id).or_default().push(AnswerOption {
            id: option.id,
            text: option.text,
            is_correct: option.is_correct,
        });
    }

    rows.into_iter()
        .map(|row| Question {
            id: row.id,
            subject: row.subject_code,
            text: row.text,
            difficulty: row.difficulty,
            options: by_question.remove(&row.id).unwrap_or_default(),
        })
        .collect()
}

pub(crate) async fn load_questions(
    pool: &PgPool,
    ids: &[QuestionId],
) -> Result<HashMap<QuestionId, Question>> {
    let rows = repositories::questions::list_by_ids(pool, ids)
        .await
        .context("Failed to load questions")?;
    let options = repositories::questions::list_options(pool, ids)
        .await
        .context("Failed to load question options")?;

    Ok(assemble_questions(rows, options)
        .into_iter()
        .map(|question| (question.id, question))
        .collect())
}

/// Reads a booklet's stored map. Structured entries that carry their subject need no
/// database access; legacy entries are restored from their questions.
pub(crate) async fn load_key_map(pool: &PgPool, booklet: &Booklet) -> Result<AnswerKeyMap> {
    let persisted = PersistedKeyMap::from_json(&booklet.answer_key.0)
        .with_context(|| format!("Booklet {} has an unreadable answer key", booklet.id))?;

    let lookup = load_questions(pool, &persisted.questions_to_lookup()).await?;
    let key_map = persisted
        .normalize(&lookup)
        .with_context(|| format!("Booklet {} has an inconsistent answer key", booklet.id))?;

    Ok(key_map)
}
