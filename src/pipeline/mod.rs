//! Production fetcher: one sequential call per site, assembled into a wide table.
//!
//! A failing site never aborts the cycle. Its column is kept and filled with
//! [`FAILED_FETCH_SENTINEL`] so that downstream views can tell "no data" from
//! "no production". There is no retry; the next refresh tries again.

use crate::enedis::ProductionSource;
use crate::enedis::parsers::wh_to_kwh;
use crate::models::{FAILED_FETCH_SENTINEL, ProductionTable, SeriesTable, SiteRegistry};
use crate::utils::Timer;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchStats {
    pub sites: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub readings: usize,
}

/// Expected half-hour grid over `[start, end)` in UTC.
pub fn half_hour_grid(start: NaiveDate, end: NaiveDate) -> Vec<DateTime<Utc>> {
    let (Some(from), Some(to)) = (start.and_hms_opt(0, 0, 0), end.and_hms_opt(0, 0, 0)) else {
        return Vec::new();
    };
    let to = to.and_utc();
    let mut t = from.and_utc();
    let mut grid = Vec::new();
    while t < to {
        grid.push(t);
        t += Duration::minutes(30);
    }
    grid
}

/// Fetch `[end - lookback_days, end)` for every site of the registry.
pub async fn fetch_production(
    source: &dyn ProductionSource,
    registry: &SiteRegistry,
    end: NaiveDate,
    lookback_days: i64,
) -> (ProductionTable, FetchStats) {
    let _t = Timer::start(format!("Production fetch ending {}", end));
    let start = end - Duration::days(lookback_days);

    let mut fetched: Vec<(String, BTreeMap<DateTime<Utc>, f64>)> = Vec::new();
    let mut failed = BTreeSet::new();
    let mut stats = FetchStats {
        sites: registry.len(),
        ..FetchStats::default()
    };

    for site in registry.sites() {
        match source.production_half_hourly(&site.id, start, end).await {
            Ok(readings) => {
                stats.succeeded += 1;
                stats.readings += readings.len();
                let mut series = BTreeMap::new();
                for r in readings {
                    if series.insert(r.timestamp, wh_to_kwh(r.production_wh)).is_some() {
                        warn!(
                            "{}: duplicate reading at {}, keeping the last one",
                            site.id, r.timestamp
                        );
                    }
                }
                fetched.push((site.id.clone(), series));
            }
            Err(e) => {
                warn!("Error with {} ({}): {}", site.id, site.address, e);
                stats.failed += 1;
                failed.insert(site.id.clone());
            }
        }
    }

    let mut index: BTreeSet<DateTime<Utc>> = fetched
        .iter()
        .flat_map(|(_, series)| series.keys().copied())
        .collect();
    if index.is_empty() {
        index.extend(half_hour_grid(start, end));
    }
    let index: Vec<DateTime<Utc>> = index.into_iter().collect();

    let mut table = SeriesTable::with_index(index);
    for id in registry.ids() {
        let values = if failed.contains(&id) {
            vec![FAILED_FETCH_SENTINEL; table.rows()]
        } else {
            let series = fetched
                .iter()
                .find(|(sid, _)| *sid == id)
                .map(|(_, s)| s);
            table
                .index
                .iter()
                .map(|t| series.and_then(|s| s.get(t)).copied().unwrap_or(f64::NAN))
                .collect()
        };
        table.push_column(id, values);
    }

    info!(
        "Fetched {} sites ({} ok, {} failed, {} readings) for {} → {}",
        stats.sites, stats.succeeded, stats.failed, stats.readings, start, end
    );

    (
        ProductionTable {
            table,
            failed,
            start,
            end,
        },
        stats,
    )
}
