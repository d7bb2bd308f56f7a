use sqlx::PgPool;

use crate::db::models::ExamRound;

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ExamRound>, sqlx::Error> {
    sqlx::query_as::<_, ExamRound>(
        "SELECT id, name, number, created_at FROM exam_rounds WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
