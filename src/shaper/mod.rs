//! Derived views over a [`ProductionTable`].
//!
//! `shape` is a pure function: same raw table, registry and reference instant
//! always give the same views. Every registry site appears exactly once in each
//! view, including sites absent from the raw table (all NaN) and failed ones.

use crate::models::{ProductionTable, SeriesTable, SiteRegistry, SiteTotal, YesterdaySummary};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ShapedSeries {
    /// Trailing window, gaps interpolated, columns named by address.
    pub trend: SeriesTable,
    /// `trend` divided by installed capacity (kWh/kWc).
    pub normalized: SeriesTable,
    /// Last 24 hours, one daily total per site. Negative values are not yet marked.
    pub yesterday: YesterdaySummary,
}

/// Midnight UTC of the day containing `now`.
pub fn midnight_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Linear interpolation by position. Leading gaps stay NaN, trailing gaps
/// carry the last known value.
pub fn interpolate_linear(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    let mut last: Option<usize> = None;

    for i in 0..out.len() {
        if out[i].is_nan() {
            continue;
        }
        if let Some(p) = last {
            let gap = i - p;
            if gap > 1 {
                let (a, b) = (out[p], out[i]);
                for k in 1..gap {
                    out[p + k] = a + (b - a) * k as f64 / gap as f64;
                }
            }
        }
        last = Some(i);
    }

    if let Some(p) = last {
        let v = out[p];
        for x in &mut out[p + 1..] {
            *x = v;
        }
    }
    out
}

/// Mean per clock hour, summed. NaN values are skipped; NaN if nothing is left.
pub fn hourly_mean_total(index: &[DateTime<Utc>], values: &[f64]) -> f64 {
    let mut hours: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for (t, v) in index.iter().zip(values) {
        if v.is_nan() {
            continue;
        }
        let bucket = hours.entry(t.timestamp().div_euclid(3600)).or_default();
        bucket.0 += v;
        bucket.1 += 1;
    }
    if hours.is_empty() {
        return f64::NAN;
    }
    hours.values().map(|(sum, n)| sum / *n as f64).sum()
}

pub fn shape(
    raw: &ProductionTable,
    registry: &SiteRegistry,
    t0: DateTime<Utc>,
    trend_hours: i64,
) -> ShapedSeries {
    let trend_raw = raw
        .table
        .slice_inclusive(t0 - Duration::hours(trend_hours), t0);
    let day = raw.table.slice_half_open(t0 - Duration::hours(24), t0);

    let mut trend = SeriesTable::with_index(trend_raw.index.clone());
    let mut normalized = SeriesTable::with_index(trend_raw.index.clone());
    let mut yesterday = YesterdaySummary::default();

    for site in registry.sites() {
        let missing = vec![f64::NAN; trend.rows()];
        let column = trend_raw.column(&site.id).unwrap_or(&missing[..]);

        // A failed column holds the sentinel; smoothing it would fabricate a curve.
        let values = if raw.is_failed(&site.id) {
            column.to_vec()
        } else {
            interpolate_linear(column)
        };

        let per_kwc = match site.usable_capacity() {
            Some(kwc) => values.iter().map(|v| v / kwc).collect(),
            None => vec![f64::NAN; values.len()],
        };

        trend.push_column(site.address.clone(), values);
        normalized.push_column(site.address.clone(), per_kwc);

        let total_kwh = match day.column(&site.id) {
            Some(col) => hourly_mean_total(&day.index, col),
            None => f64::NAN,
        };
        yesterday.totals.push(SiteTotal {
            site_id: site.id.clone(),
            address: site.address.clone(),
            capacity_kwc: site.capacity_kwc,
            total_kwh,
        });
    }

    ShapedSeries {
        trend,
        normalized,
        yesterday,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FAILED_FETCH_SENTINEL, SiteStatus};
    use crate::pipeline::half_hour_grid;
    use crate::pipeline::tests::registry;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap()
    }

    /// Raw table over three days with a constant bucket value per column.
    fn raw_constant(columns: &[(&str, f64)], failed: &[&str]) -> ProductionTable {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
        let mut table = SeriesTable::with_index(half_hour_grid(start, end));
        for (name, v) in columns {
            table.push_column(*name, vec![*v; table.rows()]);
        }
        ProductionTable {
            table,
            failed: failed.iter().map(|s| s.to_string()).collect(),
            start,
            end,
        }
    }

    fn bits(t: &SeriesTable) -> Vec<Vec<u64>> {
        t.values
            .iter()
            .map(|c| c.iter().map(|v| v.to_bits()).collect())
            .collect()
    }

    #[test]
    fn test_interpolate_linear() {
        let nan = f64::NAN;
        let out = interpolate_linear(&[nan, 1.0, nan, nan, 4.0, nan]);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.0, 2.0, 3.0, 4.0, 4.0]);
        assert!(interpolate_linear(&[nan, nan]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_hourly_mean_total() {
        let index: Vec<_> = (0..4)
            .map(|i| t0() + Duration::minutes(30 * i))
            .collect();
        // hour 0: mean(1, 3) = 2; hour 1: mean(5) = 5 (NaN skipped)
        assert_eq!(hourly_mean_total(&index, &[1.0, 3.0, 5.0, f64::NAN]), 7.0);
        assert!(hourly_mean_total(&index, &[f64::NAN; 4]).is_nan());
    }

    #[test]
    fn test_end_to_end_classification() {
        // Daily totals 15, 0 and 5 kWh spread evenly over 48 buckets.
        let raw = raw_constant(
            &[
                ("p1", 15.0 / 24.0),
                ("p2", 0.0),
                ("p3", 5.0 / 24.0),
                ("p4", FAILED_FETCH_SENTINEL),
            ],
            &["p4"],
        );
        let reg = registry(&[
            ("p1", Some(10.0)),
            ("p2", Some(20.0)),
            ("p3", Some(0.0)),
            ("p4", None),
        ]);

        let mut shaped = shape(&raw, &reg, t0(), 96);
        assert!(shaped.yesterday.get("p4").unwrap().total_kwh < 0.0);
        shaped.yesterday.mark_errors();

        let statuses: Vec<SiteStatus> =
            shaped.yesterday.totals.iter().map(|t| t.status()).collect();
        assert_eq!(
            statuses,
            vec![
                SiteStatus::Active,
                SiteStatus::NoProduction,
                SiteStatus::Active,
                SiteStatus::NoData
            ]
        );
        assert_eq!(shaped.yesterday.get("p4").unwrap().total_kwh, -1.0);
        assert_eq!(shaped.yesterday.get("p2").unwrap().total_kwh, 0.0);

        let active: Vec<f64> = shaped
            .yesterday
            .with_status(SiteStatus::Active)
            .iter()
            .map(|t| t.kwh_per_kwc())
            .collect();
        assert!((active[0] - 1.5).abs() < 1e-9);
        assert!(active[1].is_nan());
    }

    #[test]
    fn test_failed_site_sums_to_minus_one_after_marking() {
        let raw = raw_constant(&[("a", 0.2), ("b", FAILED_FETCH_SENTINEL), ("c", 0.1)], &["b"]);
        let reg = registry(&[("a", Some(3.0)), ("b", Some(3.0)), ("c", Some(3.0))]);

        let mut shaped = shape(&raw, &reg, t0(), 96);
        assert_eq!(shaped.yesterday.totals.len(), 3);
        shaped.yesterday.mark_errors();
        assert_eq!(shaped.yesterday.get("b").unwrap().total_kwh, -1.0);
    }

    #[test]
    fn test_every_site_in_every_view() {
        // "ghost" is registered but absent from the raw table.
        let raw = raw_constant(&[("a", 0.5)], &[]);
        let reg = registry(&[("a", Some(2.0)), ("ghost", Some(5.0))]);

        let shaped = shape(&raw, &reg, t0(), 96);
        assert_eq!(shaped.trend.columns, vec!["addr-a", "addr-ghost"]);
        assert_eq!(shaped.normalized.columns, vec!["addr-a", "addr-ghost"]);
        assert_eq!(shaped.yesterday.totals.len(), 2);
        assert!(shaped.trend.column("addr-ghost").unwrap().iter().all(|v| v.is_nan()));
        assert_eq!(
            shaped.yesterday.get("ghost").unwrap().status(),
            SiteStatus::NoData
        );
    }

    #[test]
    fn test_normalization() {
        let raw = raw_constant(&[("a", 0.8), ("b", 0.8), ("c", 0.8)], &[]);
        let reg = registry(&[("a", Some(4.0)), ("b", Some(0.0)), ("c", None)]);

        let shaped = shape(&raw, &reg, t0(), 96);
        let trend = shaped.trend.column("addr-a").unwrap();
        let norm = shaped.normalized.column("addr-a").unwrap();
        for (r, n) in trend.iter().zip(norm) {
            assert_eq!(*n, r / 4.0);
        }
        assert!(shaped.normalized.column("addr-b").unwrap().iter().all(|v| v.is_nan()));
        assert!(shaped.normalized.column("addr-c").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_gap_interpolated_but_sentinel_untouched() {
        let mut raw = raw_constant(&[("a", 1.0), ("b", FAILED_FETCH_SENTINEL)], &["b"]);
        let last = raw.table.rows() - 1;
        raw.table.values[0][last - 2] = f64::NAN;
        raw.table.values[1][last - 2] = f64::NAN;

        let reg = registry(&[("a", Some(1.0)), ("b", Some(1.0))]);
        let shaped = shape(&raw, &reg, t0(), 96);

        let n = shaped.trend.rows();
        assert_eq!(shaped.trend.column("addr-a").unwrap()[n - 3], 1.0);
        assert!(shaped.trend.column("addr-b").unwrap()[n - 3].is_nan());
    }

    #[test]
    fn test_shape_is_idempotent() {
        let mut raw = raw_constant(&[("a", 0.3), ("b", FAILED_FETCH_SENTINEL), ("c", 0.0)], &["b"]);
        raw.table.values[0][10] = f64::NAN;
        let reg = registry(&[("a", Some(3.0)), ("b", None), ("c", Some(0.0))]);

        let first = shape(&raw, &reg, t0(), 96);
        let second = shape(&raw, &reg, t0(), 96);

        assert_eq!(bits(&first.trend), bits(&second.trend));
        assert_eq!(bits(&first.normalized), bits(&second.normalized));
        let totals = |s: &ShapedSeries| -> Vec<u64> {
            s.yesterday.totals.iter().map(|t| t.total_kwh.to_bits()).collect()
        };
        assert_eq!(totals(&first), totals(&second));
        assert_eq!(raw.failed, BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn test_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2025, 6, 4, 17, 42, 3).unwrap();
        assert_eq!(midnight_utc(now), t0());
    }
}
