use crate::models::{SeriesTable, SiteRegistry, SiteStatus, YesterdaySummary};
use crate::shaper::ShapedSeries;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// One line of the active-site table.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRow {
    pub address: String,
    pub kwh: f64,
    pub kwh_per_kwc: f64,
    pub kwc: Option<f64>,
}

/// Everything the page shows, for one request.
#[derive(Debug, Clone)]
pub struct Report {
    pub day_end: DateTime<Utc>,
    /// Per-kWc trend of active sites.
    pub active_trend: SeriesTable,
    /// Ascending kWh/kWc, undefined ratios last.
    pub active_rows: Vec<ActiveRow>,
    pub no_production: Vec<String>,
    pub no_data: Vec<String>,
    /// Raw trend of sites above the capacity split.
    pub large_sites: SeriesTable,
    /// Raw trend of sites at or below the capacity split.
    pub small_sites: SeriesTable,
    pub split_kwc: f64,
    /// Marked summary (negatives collapsed to -1).
    pub summary: YesterdaySummary,
}

fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

pub fn build_report(
    shaped: ShapedSeries,
    registry: &SiteRegistry,
    split_kwc: f64,
    day_end: DateTime<Utc>,
) -> Report {
    let ShapedSeries {
        trend,
        normalized,
        mut yesterday,
    } = shaped;
    yesterday.mark_errors();

    let addresses = |status: SiteStatus| -> Vec<String> {
        yesterday
            .with_status(status)
            .iter()
            .map(|t| t.address.clone())
            .collect()
    };
    let active = addresses(SiteStatus::Active);
    let no_production = addresses(SiteStatus::NoProduction);
    let no_data = addresses(SiteStatus::NoData);

    let mut active_rows: Vec<ActiveRow> = yesterday
        .with_status(SiteStatus::Active)
        .into_iter()
        .map(|t| ActiveRow {
            address: t.address.clone(),
            kwh: t.total_kwh,
            kwh_per_kwc: t.kwh_per_kwc(),
            kwc: t.capacity_kwc,
        })
        .collect();
    active_rows.sort_by(|a, b| nan_last(a.kwh_per_kwc, b.kwh_per_kwc));

    // Sites with unknown capacity belong to neither group.
    let (large, small): (Vec<String>, Vec<String>) = {
        let mut large = Vec::new();
        let mut small = Vec::new();
        for site in registry.sites() {
            match site.capacity_kwc {
                Some(kwc) if kwc > split_kwc => large.push(site.address.clone()),
                Some(_) => small.push(site.address.clone()),
                None => {}
            }
        }
        (large, small)
    };

    Report {
        day_end,
        active_trend: normalized.select(&active),
        active_rows,
        no_production,
        no_data,
        large_sites: trend.select(&large),
        small_sites: trend.select(&small),
        split_kwc,
        summary: yesterday,
    }
}
