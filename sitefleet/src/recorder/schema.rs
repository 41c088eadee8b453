//! Analytics table creation and in-place schema evolution.

use sqlx::SqlitePool;

use super::RecorderError;

/// Create the `requests` table if it doesn't exist and add columns
/// introduced in later versions (currently just `profile_pic_url`),
/// tolerating the "duplicate column" error SQLite raises when the column
/// already exists.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), RecorderError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            site TEXT NOT NULL,
            path TEXT NOT NULL,
            status INTEGER NOT NULL,
            user_login TEXT NOT NULL DEFAULT '',
            user_name TEXT NOT NULL DEFAULT '',
            profile_pic_url TEXT NOT NULL DEFAULT '',
            node_name TEXT NOT NULL DEFAULT '',
            node_ip TEXT NOT NULL DEFAULT '',
            os TEXT NOT NULL DEFAULT '',
            os_version TEXT NOT NULL DEFAULT '',
            device TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_site_ts ON requests (site, ts)")
        .execute(pool)
        .await?;

    add_column_if_missing(pool, "requests", "profile_pic_url", "TEXT NOT NULL DEFAULT ''").await?;

    Ok(())
}

async fn add_column_if_missing(pool: &SqlitePool, table: &str, column: &str, ddl: &str) -> Result<(), RecorderError> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}");
    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column name") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_schema_creates_table() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();
    }
}
