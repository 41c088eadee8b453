//! Request Recorder: a bounded-queue, single-writer analytics pipeline.
//!
//! `record` is the hot path — called once per served request — so it never
//! touches the database directly. It enqueues onto a bounded channel that a
//! single background writer drains in batches. Everything that isn't on
//! that hot path (the ten aggregate queries, schema setup, purge) talks to
//! the pool directly since those are already async, low-frequency call
//! sites.

pub mod bucket;
pub mod queries;
pub mod schema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

pub use queries::StatusCounts;

/// Default batch size that triggers an early flush.
const BATCH_SIZE: usize = 100;

/// Idle-flush tick interval.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An immutable, attributed request observation, enqueued once per served
/// request and never mutated afterward.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub site: String,
    pub path: String,
    pub status: u16,
    pub user_login: String,
    pub user_name: String,
    pub profile_pic_url: String,
    pub node_name: String,
    pub node_ip: String,
    pub os: String,
    pub os_version: String,
    pub device: String,
    pub tags: Vec<String>,
}

impl RequestEvent {
    pub fn new(site: impl Into<String>, path: impl Into<String>, status: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            site: site.into(),
            path: path.into(),
            status,
            user_login: String::new(),
            user_name: String::new(),
            profile_pic_url: String::new(),
            node_name: String::new(),
            node_ip: String::new(),
            os: String::new(),
            os_version: String::new(),
            device: String::new(),
            tags: Vec::new(),
        }
    }
}

enum WriterCommand {
    Event(RequestEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Bounded-queue analytics recorder. `record` is non-blocking; `close`
/// drains the queue, flushes, and releases the writer task.
pub struct Recorder {
    tx: mpsc::Sender<WriterCommand>,
    closed: Arc<AtomicBool>,
    pool: SqlitePool,
    writer_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Open (creating/evolving the schema as needed) and start the writer
    /// task. `queue_capacity` bounds the enqueue channel; per the spec,
    /// overflow drops the newest event rather than blocking the caller.
    pub async fn open(pool: SqlitePool, queue_capacity: usize) -> Result<Self, RecorderError> {
        schema::ensure_schema(&pool).await?;

        let (tx, rx) = mpsc::channel(queue_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let writer_handle = tokio::spawn(writer_loop(pool.clone(), rx));

        Ok(Self {
            tx,
            closed,
            pool,
            writer_handle: AsyncMutex::new(Some(writer_handle)),
        })
    }

    /// Non-blocking enqueue. A no-op once [`Recorder::close`] has returned,
    /// and whenever the queue is full — the spec documents overflow as
    /// drop-newest, expected only under store stall.
    pub fn record(&self, event: RequestEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.tx.try_send(WriterCommand::Event(event)).is_err() {
            tracing::warn!("recorder queue full or closed, dropping event");
        }
    }

    /// Mark closed, drain and flush the queue, and join the writer task.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }

        if let Some(handle) = self.writer_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn purge_site(&self, site: &str) -> Result<u64, RecorderError> {
        queries::purge_site(&self.pool, site).await
    }
}

async fn writer_loop(pool: SqlitePool, mut rx: mpsc::Receiver<WriterCommand>) {
    let mut batch: Vec<RequestEvent> = Vec::with_capacity(BATCH_SIZE);
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(WriterCommand::Event(event)) => {
                        batch.push(event);
                        if batch.len() >= BATCH_SIZE {
                            flush(&pool, &mut batch).await;
                        }
                    }
                    Some(WriterCommand::Shutdown(ack)) => {
                        flush(&pool, &mut batch).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        flush(&pool, &mut batch).await;
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                if !batch.is_empty() {
                    flush(&pool, &mut batch).await;
                }
            }
        }
    }
}

/// Flush `batch` in one transaction. Per-row insert failures are logged and
/// skipped; a commit failure is logged but does not halt the writer loop.
async fn flush(pool: &SqlitePool, batch: &mut Vec<RequestEvent>) {
    if batch.is_empty() {
        return;
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!("recorder: failed to begin transaction: {e}");
            batch.clear();
            return;
        }
    };

    for event in batch.drain(..) {
        let tags = event.tags.join(",");
        let result = sqlx::query(
            "INSERT INTO requests (ts, site, path, status, user_login, user_name, profile_pic_url, node_name, node_ip, os, os_version, device, tags) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.site)
        .bind(&event.path)
        .bind(event.status as i64)
        .bind(&event.user_login)
        .bind(&event.user_name)
        .bind(&event.profile_pic_url)
        .bind(&event.node_name)
        .bind(&event.node_ip)
        .bind(&event.os)
        .bind(&event.os_version)
        .bind(&event.device)
        .bind(&tags)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            tracing::error!(site = %event.site, path = %event.path, "recorder: dropping row that failed to insert: {e}");
        }
    }

    if let Err(e) = tx.commit().await {
        tracing::error!("recorder: flush commit failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn open_recorder() -> Recorder {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        Recorder::open(pool, 1024).await.unwrap()
    }

    #[tokio::test]
    async fn test_record_then_close_persists_events() {
        let recorder = open_recorder().await;
        for i in 0..5 {
            recorder.record(RequestEvent::new("docs", format!("/p{i}"), 200));
        }
        recorder.close().await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests").fetch_one(recorder.pool()).await.unwrap();
        assert_eq!(count, 5);
    }

    // Invariant 3.
    #[tokio::test]
    async fn test_close_drains_queue_fully() {
        let recorder = open_recorder().await;
        for i in 0..250 {
            recorder.record(RequestEvent::new("docs", format!("/p{i}"), 200));
        }
        recorder.close().await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests").fetch_one(recorder.pool()).await.unwrap();
        assert_eq!(count, 250);
    }

    #[tokio::test]
    async fn test_record_after_close_is_a_safe_no_op() {
        let recorder = open_recorder().await;
        recorder.record(RequestEvent::new("docs", "/", 200));
        recorder.close().await;

        // Must not panic or block.
        recorder.record(RequestEvent::new("docs", "/late", 200));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests").fetch_one(recorder.pool()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_purge_site_through_recorder() {
        let recorder = open_recorder().await;
        recorder.record(RequestEvent::new("docs", "/", 200));
        recorder.record(RequestEvent::new("other", "/", 200));
        recorder.close().await;

        let removed = recorder.purge_site("docs").await.unwrap();
        assert_eq!(removed, 1);
    }
}
