//! Time bucketing shared by the Recorder's and the Notifier's time-series
//! queries: step selection and gap-filling.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Candidate bucket steps, in seconds, largest first.
const CANDIDATES_SECS: [i64; 9] = [86400, 43200, 28800, 21600, 14400, 7200, 3600, 1800, 900];

/// Fallback step when no candidate yields at least 64 buckets.
const FALLBACK_SECS: i64 = 900;

/// Pick the largest candidate step whose division into `to - from` yields at
/// least 64 buckets, falling back to 15 minutes.
pub fn bucket_step(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    let span = (to - from).num_seconds().max(0);
    for &candidate in CANDIDATES_SECS.iter() {
        if span / candidate >= 64 {
            return Duration::from_secs(candidate as u64);
        }
    }
    Duration::from_secs(FALLBACK_SECS as u64)
}

/// Truncate `t` to the nearest `step` boundary by epoch-second division.
pub fn truncate_to_step(t: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step_secs = step.as_secs() as i64;
    let epoch = t.timestamp();
    let truncated = epoch - epoch.rem_euclid(step_secs);
    DateTime::from_timestamp(truncated, 0).unwrap_or(t)
}

/// Gap-fill a sparse series of `(bucket_start, value)` rows from the
/// truncated `from` boundary up to and including `to`, using `zero` wherever
/// the query returned nothing.
///
/// If `from` is the Unix epoch and `rows` is non-empty, the earliest
/// returned bucket provides the start instead (per the spec's "zero time"
/// carve-out for open-ended range queries).
pub fn fill_buckets<T: Clone>(
    rows: Vec<(DateTime<Utc>, T)>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    step: Duration,
    zero: T,
) -> Vec<(DateTime<Utc>, T)> {
    let step_secs = step.as_secs() as i64;
    if step_secs <= 0 {
        return rows;
    }

    let start = if from.timestamp() == 0 && !rows.is_empty() {
        rows.iter().map(|(t, _)| *t).min().unwrap()
    } else {
        truncate_to_step(from, step)
    };

    let by_bucket: HashMap<i64, T> = rows.into_iter().map(|(t, v)| (t.timestamp(), v)).collect();

    let mut result = Vec::new();
    let mut cur = start;
    while cur <= to {
        let value = by_bucket.get(&cur.timestamp()).cloned().unwrap_or_else(|| zero.clone());
        result.push((cur, value));
        cur += chrono::Duration::seconds(step_secs);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    // Invariant 4.
    #[test]
    fn test_bucket_step_yields_at_least_64_buckets_when_possible() {
        let from = at(2026, 2, 24, 0);
        let to = at(2026, 2, 25, 0);
        let step = bucket_step(from, to);
        assert_eq!(step, Duration::from_secs(900));
        let span = (to - from).num_seconds();
        assert!(span / (step.as_secs() as i64) >= 64);
    }

    #[test]
    fn test_bucket_step_picks_coarser_step_for_long_range() {
        let from = at(2026, 1, 1, 0);
        let to = at(2027, 1, 1, 0);
        let step = bucket_step(from, to);
        // a year is long enough that even 24h buckets exceed 64.
        assert_eq!(step, Duration::from_secs(86400));
    }

    #[test]
    fn test_bucket_step_falls_back_to_15_minutes() {
        let from = at(2026, 2, 24, 0);
        let to = from + chrono::Duration::minutes(10);
        assert_eq!(bucket_step(from, to), Duration::from_secs(FALLBACK_SECS as u64));
    }

    // S1 — 24h range at 15m step yields 97 buckets (inclusive of `to`).
    #[test]
    fn test_fill_buckets_s1_shape() {
        let from = at(2026, 2, 24, 0);
        let to = at(2026, 2, 25, 0);
        let step = bucket_step(from, to);
        let rows = vec![
            (at(2026, 2, 24, 10), 1u64),
            (at(2026, 2, 24, 11), 1u64),
            (at(2026, 2, 24, 12), 1u64),
            (at(2026, 2, 24, 13), 1u64),
        ];
        let filled = fill_buckets(rows, from, to, step, 0u64);
        assert_eq!(filled.len(), 97);
        let nonzero = filled.iter().filter(|(_, c)| *c > 0).count();
        assert_eq!(nonzero, 4);
    }

    // Invariant 5.
    #[test]
    fn test_fill_buckets_is_idempotent() {
        let from = at(2026, 2, 24, 0);
        let to = at(2026, 2, 25, 0);
        let step = bucket_step(from, to);
        let rows = vec![(at(2026, 2, 24, 10), 3u64)];
        let once = fill_buckets(rows, from, to, step, 0u64);
        let twice = fill_buckets(once.clone(), from, to, step, 0u64);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fill_buckets_zero_time_uses_earliest_row() {
        let zero_time = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let to = at(2026, 2, 24, 1);
        let step = Duration::from_secs(900);
        let rows = vec![(at(2026, 2, 24, 0), 2u64)];
        let filled = fill_buckets(rows, zero_time, to, step, 0u64);
        assert_eq!(filled.first().unwrap().0, at(2026, 2, 24, 0));
    }
}
