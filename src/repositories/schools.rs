use sqlx::PgPool;

use crate::db::models::School;

/// Every school when `ids` is `None`.
pub(crate) async fn list(
    pool: &PgPool,
    ids: Option<&[String]>,
) -> Result<Vec<School>, sqlx::Error> {
    match ids {
        Some(ids) => {
            sqlx::query_as::<_, School>(
                "SELECT id, name FROM schools WHERE id = ANY($1) ORDER BY id",
            )
            .bind(ids)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, School>("SELECT id, name FROM schools ORDER BY id")
                .fetch_all(pool)
                .await
        }
    }
}
