//! Aggregate read queries over the webhook delivery-attempt log.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::recorder::bucket::{bucket_step, fill_buckets, truncate_to_step};

use super::NotifierError;

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc)).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

fn is_success(status: i64) -> bool {
    (200..300).contains(&status)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySummary {
    pub webhook_id: String,
    pub event: String,
    pub site: String,
    pub url: String,
    pub latest_status: i64,
    pub latest_attempt: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryAttempt {
    pub attempt: i64,
    pub status: i64,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPage {
    pub items: Vec<DeliverySummary>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
}

/// One row per `webhook_id`: the attempt with the highest attempt number,
/// which determines success/failure, plus the first attempt's timestamp as
/// the delivery's creation time.
async fn latest_rows(pool: &SqlitePool, site: Option<&str>, event: Option<&str>) -> Result<Vec<DeliverySummary>, NotifierError> {
    let sql = r#"
        SELECT latest.webhook_id, latest.event, latest.site, latest.url,
               latest.status AS latest_status, latest.attempt AS latest_attempt,
               first.created_at AS created_at
        FROM webhook_deliveries latest
        INNER JOIN (
            SELECT webhook_id, MAX(attempt) AS max_attempt FROM webhook_deliveries GROUP BY webhook_id
        ) m ON latest.webhook_id = m.webhook_id AND latest.attempt = m.max_attempt
        INNER JOIN (
            SELECT webhook_id, MIN(created_at) AS created_at FROM webhook_deliveries GROUP BY webhook_id
        ) first ON latest.webhook_id = first.webhook_id
    "#;

    let rows = sqlx::query(sql).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|r| DeliverySummary {
            webhook_id: r.get("webhook_id"),
            event: r.get("event"),
            site: r.get("site"),
            url: r.get("url"),
            latest_status: r.get("latest_status"),
            latest_attempt: r.get("latest_attempt"),
            created_at: parse_ts(r.get::<String, _>("created_at").as_str()),
        })
        .filter(|r| site.map(|s| r.site == s).unwrap_or(true))
        .filter(|r| event.map(|e| r.event == e).unwrap_or(true))
        .collect())
}

/// Paginated delivery list. `status_filter` is `""`, `"succeeded"`, or
/// `"failed"`; `succeeded` means the latest attempt for that webhook id is
/// 2xx, `failed` means none is.
pub async fn list_deliveries(
    pool: &SqlitePool,
    site: Option<&str>,
    event: Option<&str>,
    status_filter: &str,
    limit: i64,
    offset: i64,
) -> Result<DeliveryPage, NotifierError> {
    let mut rows = latest_rows(pool, site, event).await?;
    match status_filter {
        "succeeded" => rows.retain(|r| is_success(r.latest_status)),
        "failed" => rows.retain(|r| !is_success(r.latest_status)),
        _ => {}
    }
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = rows.len() as i64;
    let items = rows.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect();
    Ok(DeliveryPage { items, total })
}

/// All attempts for `webhook_id`, ordered by attempt number (invariant 7:
/// this is always a contiguous prefix 1..k).
pub async fn get_delivery_attempts(pool: &SqlitePool, webhook_id: &str) -> Result<Vec<DeliveryAttempt>, NotifierError> {
    let rows = sqlx::query("SELECT attempt, status, error, created_at FROM webhook_deliveries WHERE webhook_id = ?1 ORDER BY attempt ASC")
        .bind(webhook_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| DeliveryAttempt {
            attempt: r.get("attempt"),
            status: r.get("status"),
            error: r.get("error"),
            created_at: parse_ts(r.get::<String, _>("created_at").as_str()),
        })
        .collect())
}

/// Total/succeeded/failed webhook ids whose delivery was created in range.
pub async fn delivery_stats(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<DeliveryStats, NotifierError> {
    let rows: Vec<DeliverySummary> = latest_rows(pool, site, None)
        .await?
        .into_iter()
        .filter(|r| r.created_at >= from && r.created_at <= to)
        .collect();

    let total = rows.len() as i64;
    let succeeded = rows.iter().filter(|r| is_success(r.latest_status)).count() as i64;
    Ok(DeliveryStats {
        total,
        succeeded,
        failed: total - succeeded,
    })
}

/// Count of deliveries (by first-attempt timestamp) per time bucket,
/// gap-filled using the same bucketing rules as the Recorder.
pub async fn deliveries_over_time(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, i64)>, NotifierError> {
    let step = bucket_step(from, to);
    let rows: Vec<DeliverySummary> = latest_rows(pool, site, None)
        .await?
        .into_iter()
        .filter(|r| r.created_at >= from && r.created_at <= to)
        .collect();

    let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
    for row in rows {
        let bucket = truncate_to_step(row.created_at, step);
        *counts.entry(bucket.timestamp()).or_insert(0) += 1;
    }
    let series: Vec<(DateTime<Utc>, i64)> = counts.into_iter().map(|(secs, n)| (Utc.timestamp_opt(secs, 0).unwrap(), n)).collect();
    Ok(fill_buckets(series, from, to, step, 0))
}

/// Delivery counts grouped by event type in range.
pub async fn event_breakdown(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<BTreeMap<String, i64>, NotifierError> {
    let rows: Vec<DeliverySummary> = latest_rows(pool, site, None)
        .await?
        .into_iter()
        .filter(|r| r.created_at >= from && r.created_at <= to)
        .collect();

    let mut breakdown = BTreeMap::new();
    for row in rows {
        *breakdown.entry(row.event).or_insert(0) += 1;
    }
    Ok(breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::schema::ensure_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    async fn insert_attempt(pool: &SqlitePool, webhook_id: &str, event: &str, site: &str, attempt: i64, status: i64, created_at: DateTime<Utc>) {
        sqlx::query(
            "INSERT INTO webhook_deliveries (webhook_id, event, site, url, payload, attempt, status, error, created_at) \
             VALUES (?1, ?2, ?3, 'http://example.com', '{}', ?4, ?5, '', ?6)",
        )
        .bind(webhook_id)
        .bind(event)
        .bind(site)
        .bind(attempt)
        .bind(status)
        .bind(created_at.to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_list_deliveries_succeeded_vs_failed() {
        let pool = seeded_pool().await;
        insert_attempt(&pool, "msg_a", "deploy", "docs", 1, 500, at(10)).await;
        insert_attempt(&pool, "msg_a", "deploy", "docs", 2, 200, at(10)).await;
        insert_attempt(&pool, "msg_b", "deploy", "docs", 1, 500, at(11)).await;

        let succeeded = list_deliveries(&pool, Some("docs"), None, "succeeded", 10, 0).await.unwrap();
        assert_eq!(succeeded.total, 1);
        assert_eq!(succeeded.items[0].webhook_id, "msg_a");

        let failed = list_deliveries(&pool, Some("docs"), None, "failed", 10, 0).await.unwrap();
        assert_eq!(failed.total, 1);
        assert_eq!(failed.items[0].webhook_id, "msg_b");
    }

    #[tokio::test]
    async fn test_get_delivery_attempts_ordered() {
        let pool = seeded_pool().await;
        insert_attempt(&pool, "msg_a", "deploy", "docs", 2, 500, at(10)).await;
        insert_attempt(&pool, "msg_a", "deploy", "docs", 1, 500, at(9)).await;
        let attempts = get_delivery_attempts(&pool, "msg_a").await.unwrap();
        assert_eq!(attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delivery_stats() {
        let pool = seeded_pool().await;
        insert_attempt(&pool, "msg_a", "deploy", "docs", 1, 200, at(10)).await;
        insert_attempt(&pool, "msg_b", "deploy", "docs", 1, 500, at(11)).await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let stats = delivery_stats(&pool, Some("docs"), from, to).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_event_breakdown_groups_by_event() {
        let pool = seeded_pool().await;
        insert_attempt(&pool, "msg_a", "deploy", "docs", 1, 200, at(10)).await;
        insert_attempt(&pool, "msg_b", "config_change", "docs", 1, 200, at(11)).await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let breakdown = event_breakdown(&pool, Some("docs"), from, to).await.unwrap();
        assert_eq!(breakdown["deploy"], 1);
        assert_eq!(breakdown["config_change"], 1);
    }
}
