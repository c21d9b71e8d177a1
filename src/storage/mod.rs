use crate::models::{ProductionTable, SeriesTable};
use crate::pipeline::FetchStats;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{Connection, OptionalExt, params};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS cached_tables (
    cache_key     VARCHAR PRIMARY KEY,
    window_start  DATE    NOT NULL,
    window_end    DATE    NOT NULL,
    -- JSON arrays of site ids
    columns       VARCHAR NOT NULL,
    failed        VARCHAR NOT NULL,
    stored_at     TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS cached_readings (
    cache_key   VARCHAR NOT NULL,
    site_id     VARCHAR NOT NULL,
    ts_ms       BIGINT  NOT NULL,
    -- NULL for missing values
    kwh         DOUBLE,
    PRIMARY KEY (cache_key, site_id, ts_ms)
);

CREATE SEQUENCE IF NOT EXISTS fetch_run_ids START 1;

CREATE TABLE IF NOT EXISTS fetch_runs (
    id           BIGINT PRIMARY KEY DEFAULT nextval('fetch_run_ids'),
    window_end   DATE      NOT NULL,
    finished_at  TIMESTAMP NOT NULL,
    sites        INTEGER   NOT NULL,
    succeeded    INTEGER   NOT NULL,
    failed       INTEGER   NOT NULL,
    readings     INTEGER   NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        debug!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    // ── Cached production tables ──────────────────────────────────────────────

    /// Store a table under `key`, replacing any previous entry.
    pub fn put_table(&self, key: &str, raw: &ProductionTable) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM cached_readings WHERE cache_key = ?", params![key])?;
        tx.execute("DELETE FROM cached_tables WHERE cache_key = ?", params![key])?;

        tx.execute(
            r#"INSERT INTO cached_tables
                   (cache_key, window_start, window_end, columns, failed, stored_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                key,
                raw.start,
                raw.end,
                serde_json::to_string(&raw.table.columns)?,
                serde_json::to_string(&raw.failed)?,
                Utc::now().naive_utc(),
            ],
        )
        .with_context(|| format!("insert cached table {}", key))?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO cached_readings (cache_key, site_id, ts_ms, kwh) VALUES (?, ?, ?, ?)",
            )?;
            for (site_id, values) in raw.table.columns.iter().zip(&raw.table.values) {
                for (ts, v) in raw.table.index.iter().zip(values) {
                    let kwh = if v.is_nan() { None } else { Some(*v) };
                    stmt.execute(params![key, site_id, ts.timestamp_millis(), kwh])?;
                }
            }
        }

        tx.commit()?;
        debug!("Stored {} ({} rows)", key, raw.table.rows());
        Ok(())
    }

    pub fn get_table(&self, key: &str) -> Result<Option<ProductionTable>> {
        let header: Option<(NaiveDate, NaiveDate, String, String)> = self
            .conn
            .query_row(
                "SELECT window_start, window_end, columns, failed FROM cached_tables WHERE cache_key = ?",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        let Some((start, end, columns, failed)) = header else {
            return Ok(None);
        };
        let columns: Vec<String> = serde_json::from_str(&columns)?;

        let mut stmt = self.conn.prepare(
            "SELECT site_id, ts_ms, kwh FROM cached_readings WHERE cache_key = ? ORDER BY ts_ms",
        )?;
        let rows = stmt
            .query_map(params![key], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, Option<f64>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut index: Vec<i64> = rows.iter().map(|(_, ts, _)| *ts).collect();
        index.dedup();
        let position: HashMap<i64, usize> =
            index.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();

        let mut table = SeriesTable::with_index(
            index
                .iter()
                .filter_map(|ms| DateTime::<Utc>::from_timestamp_millis(*ms))
                .collect(),
        );
        let mut values: HashMap<&str, Vec<f64>> = columns
            .iter()
            .map(|c| (c.as_str(), vec![f64::NAN; index.len()]))
            .collect();
        for (site_id, ts, kwh) in &rows {
            if let (Some(col), Some(&i)) = (values.get_mut(site_id.as_str()), position.get(ts)) {
                col[i] = kwh.unwrap_or(f64::NAN);
            }
        }
        for c in &columns {
            let col = values.remove(c.as_str()).unwrap_or_default();
            table.push_column(c.clone(), col);
        }

        Ok(Some(ProductionTable {
            table,
            failed: serde_json::from_str(&failed)?,
            start,
            end,
        }))
    }

    pub fn clear_tables(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM cached_readings", [])?;
        let n = tx.execute("DELETE FROM cached_tables", [])?;
        tx.commit()?;
        info!("Disk cache cleared ({} tables)", n);
        Ok(n)
    }

    // ── Fetch run log ─────────────────────────────────────────────────────────

    pub fn record_fetch_run(&self, window_end: NaiveDate, stats: &FetchStats) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            r#"INSERT INTO fetch_runs
                   (window_end, finished_at, sites, succeeded, failed, readings)
               VALUES (?, ?, ?, ?, ?, ?)
               RETURNING id"#,
            params![
                window_end,
                Utc::now().naive_utc(),
                stats.sites as i64,
                stats.succeeded as i64,
                stats.failed as i64,
                stats.readings as i64,
            ],
            |r| r.get(0),
        )?;
        Ok(id)
    }
}
