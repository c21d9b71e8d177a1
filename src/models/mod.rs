use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Half-hour buckets in one day.
pub const BUCKETS_PER_DAY: usize = 48;

/// Value written in every bucket of a site whose fetch failed.
/// One day of buckets sums to -1, which keeps it apart from a genuine zero.
pub const FAILED_FETCH_SENTINEL: f64 = -1.0 / BUCKETS_PER_DAY as f64;

// ── Site registry ─────────────────────────────────────────────────────────────

/// One photovoltaic installation, keyed by its metering point (PRM).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    #[serde(rename = "prm")]
    pub id: String,
    #[serde(rename = "adresse")]
    pub address: String,
    #[serde(rename = "kwc", default)]
    pub capacity_kwc: Option<f64>,
}

impl Site {
    /// Capacity usable as a divisor: `None` when absent or zero.
    pub fn usable_capacity(&self) -> Option<f64> {
        self.capacity_kwc.filter(|v| *v != 0.0 && v.is_finite())
    }
}

/// Ordered, immutable set of sites. Column order of every table follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteRegistry {
    sites: Vec<Site>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn ids(&self) -> Vec<String> {
        self.sites.iter().map(|s| s.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

// ── Wide time-indexed table ───────────────────────────────────────────────────

/// Time-indexed table, one `f64` column per name. NaN marks a missing value.
#[derive(Debug, Clone, Default)]
pub struct SeriesTable {
    pub index: Vec<DateTime<Utc>>,
    pub columns: Vec<String>,
    /// Column-major: `values[c][row]`.
    pub values: Vec<Vec<f64>>,
}

impl SeriesTable {
    pub fn with_index(index: Vec<DateTime<Utc>>) -> Self {
        Self {
            index,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.index.len());
        self.columns.push(name.into());
        self.values.push(values);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }

    pub fn rows(&self) -> usize {
        self.index.len()
    }

    /// Rows whose timestamp falls within `[from, to]`.
    pub fn slice_inclusive(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.slice_by(|t| t >= from && t <= to)
    }

    /// Rows whose timestamp falls within `[from, to)`.
    pub fn slice_half_open(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.slice_by(|t| t >= from && t < to)
    }

    fn slice_by(&self, keep: impl Fn(DateTime<Utc>) -> bool) -> Self {
        let rows: Vec<usize> = (0..self.index.len())
            .filter(|&i| keep(self.index[i]))
            .collect();
        Self {
            index: rows.iter().map(|&i| self.index[i]).collect(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|col| rows.iter().map(|&i| col[i]).collect())
                .collect(),
        }
    }

    /// Keep only the named columns, in the given order. Unknown names are skipped.
    pub fn select(&self, names: &[String]) -> Self {
        let mut out = Self::with_index(self.index.clone());
        for name in names {
            if let Some(col) = self.column(name) {
                out.push_column(name.clone(), col.to_vec());
            }
        }
        out
    }

    /// Finite `(timestamp, value)` points of one column.
    pub fn points(&self, column: usize) -> Vec<(DateTime<Utc>, f64)> {
        self.index
            .iter()
            .zip(&self.values[column])
            .filter(|(_, v)| v.is_finite())
            .map(|(t, v)| (*t, *v))
            .collect()
    }
}

// ── Raw production ────────────────────────────────────────────────────────────

/// Half-hourly production in kWh, one column per site id.
#[derive(Debug, Clone)]
pub struct ProductionTable {
    pub table: SeriesTable,
    /// Site ids whose fetch failed in this cycle; their column holds the sentinel.
    pub failed: BTreeSet<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ProductionTable {
    pub fn is_failed(&self, site_id: &str) -> bool {
        self.failed.contains(site_id)
    }
}

/// One reading returned by the production source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductionReading {
    pub timestamp: DateTime<Utc>,
    pub production_wh: f64,
}

// ── Yesterday summary ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    NoProduction,
    NoData,
}

impl SiteStatus {
    /// Negative or undefined → no data, zero → no production, positive → active.
    pub fn classify(total_kwh: f64) -> Self {
        if total_kwh.is_nan() || total_kwh < 0.0 {
            SiteStatus::NoData
        } else if total_kwh == 0.0 {
            SiteStatus::NoProduction
        } else {
            SiteStatus::Active
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteTotal {
    pub site_id: String,
    pub address: String,
    pub capacity_kwc: Option<f64>,
    pub total_kwh: f64,
}

impl SiteTotal {
    pub fn status(&self) -> SiteStatus {
        SiteStatus::classify(self.total_kwh)
    }

    /// kWh per installed kWc, NaN when capacity is absent or zero.
    pub fn kwh_per_kwc(&self) -> f64 {
        match self.capacity_kwc.filter(|v| *v != 0.0) {
            Some(kwc) => self.total_kwh / kwc,
            None => f64::NAN,
        }
    }
}

/// Daily production totals for the last 24 hours, one entry per site.
#[derive(Debug, Clone, Default, Serialize)]
pub struct YesterdaySummary {
    pub totals: Vec<SiteTotal>,
}

impl YesterdaySummary {
    /// Collapse every negative total to exactly -1.
    pub fn mark_errors(&mut self) {
        for t in &mut self.totals {
            if t.total_kwh < 0.0 {
                t.total_kwh = -1.0;
            }
        }
    }

    pub fn get(&self, site_id: &str) -> Option<&SiteTotal> {
        self.totals.iter().find(|t| t.site_id == site_id)
    }

    pub fn with_status(&self, status: SiteStatus) -> Vec<&SiteTotal> {
        self.totals.iter().filter(|t| t.status() == status).collect()
    }
}
