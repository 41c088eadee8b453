//! Webhook delivery-attempt log table creation.

use sqlx::SqlitePool;

use super::NotifierError;

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), NotifierError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            webhook_id TEXT NOT NULL,
            event TEXT NOT NULL,
            site TEXT NOT NULL,
            url TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            status INTEGER NOT NULL,
            error TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_webhook_id ON webhook_deliveries (webhook_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_site_created ON webhook_deliveries (site, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
