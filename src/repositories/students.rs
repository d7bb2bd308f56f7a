use sqlx::PgPool;

use crate::db::models::Student;

pub(crate) const COLUMNS: &str = "id, school_id, external_ref, full_name, grade_level";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!("SELECT {COLUMNS} FROM students WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Students whose external reference is any of `refs`, optionally within one school.
pub(crate) async fn list_by_external_refs(
    pool: &PgPool,
    school_id: Option<&str>,
    refs: &[String],
) -> Result<Vec<Student>, sqlx::Error> {
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, Student>(&format!(
        "SELECT {COLUMNS} FROM students
         WHERE external_ref = ANY($1)
           AND ($2::TEXT IS NULL OR school_id = $2)
         ORDER BY id"
    ))
    .bind(refs)
    .bind(school_id)
    .fetch_all(pool)
    .await
}
