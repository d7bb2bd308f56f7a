use sqlx::PgPool;

use crate::db::models::QuestionOptionRow;
use crate::db::types::QuestionDifficulty;

/// A question joined with the code of its subject.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct QuestionSubjectRow {
    pub(crate) id: i64,
    pub(crate) subject_code: String,
    pub(crate) text: String,
    pub(crate) difficulty: QuestionDifficulty,
}

const OPTION_COLUMNS: &str = "id, question_id, text, is_correct";

/// Questions of one section in expert order.
pub(crate) async fn list_for_section(
    pool: &PgPool,
    section_id: &str,
) -> Result<Vec<QuestionSubjectRow>, sqlx::Error> {
    sqlx::query_as::<_, QuestionSubjectRow>(
        "SELECT q.id, sub.code AS subject_code, q.text, q.difficulty
         FROM section_questions sq
         JOIN questions q ON q.id = sq.question_id
         JOIN subjects sub ON sub.id = q.subject_id
         WHERE sq.section_id = $1
         ORDER BY sq.order_index, q.id",
    )
    .bind(section_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_ids(
    pool: &PgPool,
    ids: &[i64],
) -> Result<Vec<QuestionSubjectRow>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, QuestionSubjectRow>(
        "SELECT q.id, sub.code AS subject_code, q.text, q.difficulty
         FROM questions q
         JOIN subjects sub ON sub.id = q.subject_id
         WHERE q.id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}

/// Options of the given questions, in creation order.
pub(crate) async fn list_options(
    pool: &PgPool,
    question_ids: &[i64],
) -> Result<Vec<QuestionOptionRow>, sqlx::Error> {
    if question_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, QuestionOptionRow>(&format!(
        "SELECT {OPTION_COLUMNS} FROM question_options
         WHERE question_id = ANY($1)
         ORDER BY question_id, id"
    ))
    .bind(question_ids)
    .fetch_all(pool)
    .await
}
