//! Aggregate read queries over the `requests` table.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use super::bucket::{bucket_step, fill_buckets};
use super::RecorderError;

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc)).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

/// Total request count in `[from, to]`, optionally scoped to one site.
pub async fn total(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64, RecorderError> {
    let count: i64 = match site {
        Some(s) => sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3")
            .bind(s)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_one(pool)
            .await?,
        None => sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE ts >= ?1 AND ts <= ?2")
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_one(pool)
            .await?,
    };
    Ok(count)
}

/// Distinct non-empty `user_login` values in range.
pub async fn unique_visitors(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64, RecorderError> {
    let count: i64 = match site {
        Some(s) => sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_login) FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3 AND user_login <> ''",
        )
        .bind(s)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(pool)
        .await?,
        None => sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_login) FROM requests WHERE ts >= ?1 AND ts <= ?2 AND user_login <> ''",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(pool)
        .await?,
    };
    Ok(count)
}

/// Distinct `path` values in range.
pub async fn unique_paths(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64, RecorderError> {
    let count: i64 = match site {
        Some(s) => sqlx::query_scalar("SELECT COUNT(DISTINCT path) FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3")
            .bind(s)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_one(pool)
            .await?,
        None => sqlx::query_scalar("SELECT COUNT(DISTINCT path) FROM requests WHERE ts >= ?1 AND ts <= ?2")
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_one(pool)
            .await?,
    };
    Ok(count)
}

async fn fetch_timestamps(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, RecorderError> {
    let rows = match site {
        Some(s) => sqlx::query("SELECT ts FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3")
            .bind(s)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(pool)
            .await?,
        None => sqlx::query("SELECT ts FROM requests WHERE ts >= ?1 AND ts <= ?2")
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(pool)
            .await?,
    };
    Ok(rows.into_iter().map(|r| parse_ts(r.get::<String, _>("ts").as_str())).collect())
}

/// Request count per time bucket, gap-filled.
pub async fn requests_over_time(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, i64)>, RecorderError> {
    let step = bucket_step(from, to);
    let timestamps = fetch_timestamps(pool, site, from, to).await?;

    let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
    for ts in timestamps {
        let bucket = super::bucket::truncate_to_step(ts, step);
        *counts.entry(bucket.timestamp()).or_insert(0) += 1;
    }
    let rows: Vec<(DateTime<Utc>, i64)> = counts.into_iter().map(|(secs, n)| (Utc.timestamp_opt(secs, 0).unwrap(), n)).collect();

    Ok(fill_buckets(rows, from, to, step, 0))
}

/// HTTP status category, `1xx`..`5xx`.
fn status_category(status: i64) -> &'static str {
    match status / 100 {
        1 => "1xx",
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        5 => "5xx",
        _ => "5xx",
    }
}

/// Counts per status category for a single time bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub informational: i64,
    pub ok: i64,
    pub redirect: i64,
    pub client_err: i64,
    pub server_err: i64,
}

impl StatusCounts {
    fn add(&mut self, status: i64) {
        match status_category(status) {
            "1xx" => self.informational += 1,
            "2xx" => self.ok += 1,
            "3xx" => self.redirect += 1,
            "4xx" => self.client_err += 1,
            _ => self.server_err += 1,
        }
    }
}

async fn fetch_timestamp_status_pairs(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, i64)>, RecorderError> {
    let rows = match site {
        Some(s) => sqlx::query("SELECT ts, status FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3")
            .bind(s)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(pool)
            .await?,
        None => sqlx::query("SELECT ts, status FROM requests WHERE ts >= ?1 AND ts <= ?2")
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(pool)
            .await?,
    };
    Ok(rows
        .into_iter()
        .map(|r| (parse_ts(r.get::<String, _>("ts").as_str()), r.get::<i64, _>("status")))
        .collect())
}

/// Status-split request counts per time bucket, gap-filled with an
/// all-zero record for missing buckets.
pub async fn requests_over_time_by_status(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, StatusCounts)>, RecorderError> {
    let step = bucket_step(from, to);
    let pairs = fetch_timestamp_status_pairs(pool, site, from, to).await?;

    let mut by_bucket: BTreeMap<i64, StatusCounts> = BTreeMap::new();
    for (ts, status) in pairs {
        let bucket = super::bucket::truncate_to_step(ts, step);
        by_bucket.entry(bucket.timestamp()).or_default().add(status);
    }
    let rows: Vec<(DateTime<Utc>, StatusCounts)> =
        by_bucket.into_iter().map(|(secs, counts)| (Utc.timestamp_opt(secs, 0).unwrap(), counts)).collect();

    Ok(fill_buckets(rows, from, to, step, StatusCounts::default()))
}

async fn grouped_counts(
    pool: &SqlitePool,
    column: &str,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: Option<i64>,
) -> Result<Vec<(String, i64)>, RecorderError> {
    let limit_clause = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
    let sql = match site {
        Some(_) => format!(
            "SELECT {column} AS k, COUNT(*) AS n FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3 AND {column} <> '' GROUP BY {column} ORDER BY n DESC{limit_clause}"
        ),
        None => format!(
            "SELECT {column} AS k, COUNT(*) AS n FROM requests WHERE ts >= ?1 AND ts <= ?2 AND {column} <> '' GROUP BY {column} ORDER BY n DESC{limit_clause}"
        ),
    };
    let rows = match site {
        Some(s) => sqlx::query(&sql).bind(s).bind(from.to_rfc3339()).bind(to.to_rfc3339()).fetch_all(pool).await?,
        None => sqlx::query(&sql).bind(from.to_rfc3339()).bind(to.to_rfc3339()).fetch_all(pool).await?,
    };
    Ok(rows.into_iter().map(|r| (r.get::<String, _>("k"), r.get::<i64, _>("n"))).collect())
}

/// Top `limit` pages by request count, descending; tie order unspecified.
pub async fn top_pages(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<(String, i64)>, RecorderError> {
    grouped_counts(pool, "path", site, from, to, Some(limit)).await
}

/// Top `limit` visitors (by `user_login`) by request count, descending.
pub async fn top_visitors(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<(String, i64)>, RecorderError> {
    grouped_counts(pool, "user_login", site, from, to, Some(limit)).await
}

/// Overall status breakdown for the range, always reporting all five
/// categories lexically ascending (zero where no rows fell in a category).
pub async fn status_breakdown(
    pool: &SqlitePool,
    site: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<BTreeMap<String, i64>, RecorderError> {
    let statuses = match site {
        Some(s) => sqlx::query_scalar::<_, i64>("SELECT status FROM requests WHERE site = ?1 AND ts >= ?2 AND ts <= ?3")
            .bind(s)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(pool)
            .await?,
        None => sqlx::query_scalar::<_, i64>("SELECT status FROM requests WHERE ts >= ?1 AND ts <= ?2")
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(pool)
            .await?,
    };

    let mut breakdown = BTreeMap::new();
    for category in ["1xx", "2xx", "3xx", "4xx", "5xx"] {
        breakdown.insert(category.to_string(), 0);
    }
    for status in statuses {
        *breakdown.entry(status_category(status).to_string()).or_insert(0) += 1;
    }
    Ok(breakdown)
}

/// Request counts bucketed by UTC hour-of-day, 0..23.
pub async fn hourly_pattern(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<[i64; 24], RecorderError> {
    let timestamps = fetch_timestamps(pool, site, from, to).await?;
    let mut hours = [0i64; 24];
    for ts in timestamps {
        hours[ts.format("%H").to_string().parse::<usize>().unwrap_or(0)] += 1;
    }
    Ok(hours)
}

/// Breakdown by `os`, across all sites (or one, if scoped).
pub async fn os_breakdown(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, RecorderError> {
    grouped_counts(pool, "os", site, from, to, None).await
}

/// Breakdown by `node_name`.
pub async fn node_breakdown(pool: &SqlitePool, site: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, RecorderError> {
    grouped_counts(pool, "node_name", site, from, to, None).await
}

/// Breakdown by `site`, for the fleet-wide dashboard (ignores any site
/// scope, since the whole point is cross-site comparison).
pub async fn site_breakdown(pool: &SqlitePool, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, RecorderError> {
    grouped_counts(pool, "site", None, from, to, None).await
}

/// Delete all rows for `site`, returning the number removed.
pub async fn purge_site(pool: &SqlitePool, site: &str) -> Result<u64, RecorderError> {
    let result = sqlx::query("DELETE FROM requests WHERE site = ?1").bind(site).execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::schema::ensure_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    async fn insert(pool: &SqlitePool, site: &str, path: &str, status: i64, ts: DateTime<Utc>, login: &str) {
        sqlx::query("INSERT INTO requests (ts, site, path, status, user_login) VALUES (?1, ?2, ?3, ?4, ?5)")
            .bind(ts.to_rfc3339())
            .bind(site)
            .bind(path)
            .bind(status)
            .bind(login)
            .execute(pool)
            .await
            .unwrap();
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, h, 0, 0).unwrap()
    }

    // S1 — Recorder gap-fill.
    #[tokio::test]
    async fn test_requests_over_time_s1() {
        let pool = seeded_pool().await;
        for h in [10, 11, 12, 13] {
            insert(&pool, "docs", "/", 200, at(h), "alice").await;
        }
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let series = requests_over_time(&pool, Some("docs"), from, to).await.unwrap();
        assert_eq!(series.len(), 97);
        assert_eq!(series.iter().filter(|(_, c)| *c > 0).count(), 4);
    }

    // S2 — Status split.
    #[tokio::test]
    async fn test_requests_over_time_by_status_s2() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/", 200, at(10), "alice").await;
        insert(&pool, "docs", "/", 200, at(10), "bob").await;
        insert(&pool, "docs", "/", 200, at(11), "carol").await;
        insert(&pool, "docs", "/", 404, at(12), "").await;

        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let series = requests_over_time_by_status(&pool, Some("docs"), from, to).await.unwrap();
        let ok: i64 = series.iter().map(|(_, c)| c.ok).sum();
        let client_err: i64 = series.iter().map(|(_, c)| c.client_err).sum();
        let server_err: i64 = series.iter().map(|(_, c)| c.server_err).sum();
        assert_eq!(ok, 3);
        assert_eq!(client_err, 1);
        assert_eq!(server_err, 0);
    }

    #[tokio::test]
    async fn test_unique_visitors_excludes_empty_login() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/", 200, at(10), "alice").await;
        insert(&pool, "docs", "/about", 200, at(11), "alice").await;
        insert(&pool, "docs", "/", 200, at(12), "").await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        assert_eq!(unique_visitors(&pool, Some("docs"), from, to).await.unwrap(), 1);
        assert_eq!(total(&pool, Some("docs"), from, to).await.unwrap(), 3);
        assert_eq!(unique_paths(&pool, Some("docs"), from, to).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_top_pages_orders_descending() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/a", 200, at(10), "alice").await;
        insert(&pool, "docs", "/a", 200, at(11), "bob").await;
        insert(&pool, "docs", "/b", 200, at(12), "carol").await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let top = top_pages(&pool, Some("docs"), from, to, 10).await.unwrap();
        assert_eq!(top[0], ("/a".to_string(), 2));
    }

    #[tokio::test]
    async fn test_status_breakdown_always_has_five_categories() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/", 200, at(10), "alice").await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let breakdown = status_breakdown(&pool, Some("docs"), from, to).await.unwrap();
        assert_eq!(breakdown.len(), 5);
        assert_eq!(breakdown["2xx"], 1);
        assert_eq!(breakdown["4xx"], 0);
        let keys: Vec<&String> = breakdown.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn test_hourly_pattern_groups_by_utc_hour() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/", 200, at(10), "alice").await;
        insert(&pool, "docs", "/", 200, at(10), "bob").await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let hours = hourly_pattern(&pool, Some("docs"), from, to).await.unwrap();
        assert_eq!(hours[10], 2);
    }

    #[tokio::test]
    async fn test_purge_site_removes_only_that_site() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/", 200, at(10), "alice").await;
        insert(&pool, "other", "/", 200, at(10), "bob").await;
        let removed = purge_site(&pool, "docs").await.unwrap();
        assert_eq!(removed, 1);
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        assert_eq!(total(&pool, Some("other"), from, to).await.unwrap(), 1);
        assert_eq!(total(&pool, Some("docs"), from, to).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_site_breakdown_spans_all_sites() {
        let pool = seeded_pool().await;
        insert(&pool, "docs", "/", 200, at(10), "alice").await;
        insert(&pool, "other", "/", 200, at(10), "bob").await;
        let from = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap();
        let breakdown = site_breakdown(&pool, from, to).await.unwrap();
        assert_eq!(breakdown.len(), 2);
    }
}
