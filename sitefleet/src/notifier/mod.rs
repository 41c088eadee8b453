//! Webhook Notifier: fire-and-forget outbound delivery with HMAC signing,
//! SSRF-defended dialing, a bounded retry schedule, and a persistent
//! attempt log.

pub mod queries;
pub mod schema;
pub mod signature;
pub mod ssrf;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use uuid::Uuid;

const MAX_IN_FLIGHT_DEFAULT: usize = 20;
const RESPONSE_DRAIN_LIMIT: usize = 4096;
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The subset of a site's configuration the Notifier consumes.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    /// Non-empty allow-list of event names; empty or absent means "all events".
    pub events: Option<Vec<String>>,
}

#[derive(Serialize)]
struct Payload<'a> {
    #[serde(rename = "type")]
    event: &'a str,
    timestamp: String,
    data: serde_json::Value,
}

fn generate_message_id() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("msg_{hex}")
}

/// Bounds concurrent deliveries and logs every attempt to `pool`.
pub struct Notifier {
    pool: SqlitePool,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    retry_delays: Vec<Duration>,
}

impl Notifier {
    pub async fn open(pool: SqlitePool, max_in_flight: usize, retry_delays: Vec<Duration>) -> Result<Self, NotifierError> {
        schema::ensure_schema(&pool).await?;

        let client = reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");

        Ok(Self {
            pool,
            client,
            semaphore: Arc::new(Semaphore::new(if max_in_flight == 0 { MAX_IN_FLIGHT_DEFAULT } else { max_in_flight })),
            retry_delays,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fire a webhook for `event` on `site`, non-blocking. A no-op if the
    /// config has no URL, or a non-empty event allow-list excludes `event`.
    /// Drops the call with a log entry if the in-flight slot pool is
    /// exhausted.
    pub fn fire(&self, event: &str, site: &str, config: &WebhookConfig, data: serde_json::Value) {
        let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };
        if let Some(events) = &config.events {
            if !events.is_empty() && !events.iter().any(|e| e == event) {
                return;
            }
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(site, event, "notifier: in-flight limit reached, dropping delivery");
                return;
            }
        };

        let pool = self.pool.clone();
        let client = self.client.clone();
        let retry_delays = self.retry_delays.clone();
        let url = url.to_string();
        let secret = config.secret.clone();
        let site = site.to_string();
        let event = event.to_string();

        tokio::spawn(async move {
            let _permit = permit;
            deliver(&pool, &client, &retry_delays, &site, &event, &url, secret.as_deref(), data).await;
        });
    }
}

/// One full delivery: up to `1 + retry_delays.len()` attempts, sleeping
/// between failures, logging every attempt as its own append-only row.
async fn deliver(
    pool: &SqlitePool,
    client: &reqwest::Client,
    retry_delays: &[Duration],
    site: &str,
    event: &str,
    url: &str,
    secret: Option<&str>,
    data: serde_json::Value,
) {
    let webhook_id = generate_message_id();
    let timestamp = Utc::now();
    let payload = Payload {
        event,
        timestamp: timestamp.to_rfc3339(),
        data,
    };
    let body = match serde_json::to_string(&payload) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(site, event, "notifier: failed to serialize payload: {e}");
            return;
        }
    };

    let max_attempts = 1 + retry_delays.len();

    for attempt in 1..=max_attempts {
        let (status, error) = attempt_delivery(client, url, &webhook_id, &body, secret).await;
        record_attempt(pool, &webhook_id, event, site, url, &body, attempt as i64, status, &error).await;

        if (200..300).contains(&status) {
            return;
        }
        if attempt < max_attempts {
            tokio::time::sleep(retry_delays[attempt - 1]).await;
        }
    }
}

/// Send one attempt. Returns `(http_status_or_0, error_message)`.
async fn attempt_delivery(client: &reqwest::Client, url: &str, webhook_id: &str, body: &str, secret: Option<&str>) -> (i64, String) {
    let parsed_url = match reqwest::Url::parse(url) {
        Ok(u) => u,
        Err(e) => return (0, format!("invalid URL: {e}")),
    };
    if let Err(e) = ssrf::check_not_private(&parsed_url) {
        return (0, e);
    }

    let timestamp = Utc::now().timestamp();
    let mut request = client
        .post(parsed_url)
        .header("content-type", "application/json")
        .header("webhook-id", webhook_id)
        .header("webhook-timestamp", timestamp.to_string())
        .body(body.to_string());

    if let Some(secret) = secret {
        let signature = signature::sign(secret, webhook_id, timestamp, body);
        request = request.header("webhook-signature", signature);
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16() as i64;
            drain_response(response).await;
            (status, String::new())
        }
        Err(e) => (0, e.to_string()),
    }
}

/// Read and discard up to [`RESPONSE_DRAIN_LIMIT`] bytes of the response
/// body, then drop it.
async fn drain_response(response: reqwest::Response) {
    let mut stream = response.bytes_stream();
    let mut read = 0usize;
    while read < RESPONSE_DRAIN_LIMIT {
        match stream.next().await {
            Some(Ok(chunk)) => read += chunk.len(),
            _ => break,
        }
    }
}

async fn record_attempt(pool: &SqlitePool, webhook_id: &str, event: &str, site: &str, url: &str, payload: &str, attempt: i64, status: i64, error: &str) {
    let result = sqlx::query(
        "INSERT INTO webhook_deliveries (webhook_id, event, site, url, payload, attempt, status, error, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(webhook_id)
    .bind(event)
    .bind(site)
    .bind(url)
    .bind(payload)
    .bind(attempt)
    .bind(status)
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(webhook_id, "notifier: failed to record delivery attempt: {e}");
    }
}
