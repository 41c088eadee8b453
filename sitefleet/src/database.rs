//! SQLite pool creation with retry/backoff and the WAL + busy-timeout
//! configuration mandated by the shared-resource policy: the analytics DB and
//! the webhook log DB are each written by one dedicated writer but read
//! concurrently by many callers, so both must tolerate lock contention
//! instead of surfacing `SQLITE_BUSY` to callers.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::{sanitize_url, DatabaseError, Error, Result};

/// Busy-timeout applied to every SQLite connection, matching the recorder
/// flush policy that relies on the store's own contention handling rather
/// than an explicit flush timeout.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if necessary) a SQLite pool configured for WAL mode and a
/// busy-timeout, retrying with exponential backoff on transient failures.
pub async fn create_pool_with_retries(url: &str, max_retries: u32, base_delay: Duration) -> Result<SqlitePool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_create_pool(url).await {
            Ok(pool) => return Ok(pool),
            Err(err) if attempt > max_retries => {
                tracing::error!(url = %sanitize_url(url), attempt, "exhausted database connection retries");
                return Err(err);
            }
            Err(err) => {
                let delay = base_delay * 2u32.pow(attempt - 1);
                tracing::warn!(
                    url = %sanitize_url(url),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "database connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_pool(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| {
            Error::from(DatabaseError::new(
                crate::error::DatabaseOperation::Connect,
                crate::error::DatabaseErrorKind::Configuration,
                e.to_string(),
            ))
        })?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("journal_mode", "WAL");

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    Ok(pool)
}
