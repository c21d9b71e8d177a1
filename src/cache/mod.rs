//! Explicit production caches, injected into the dashboard.
//!
//! `TtlCache` keeps a few tables in memory for a fixed time. Outside
//! production mode a `DiskCache` (DuckDB) sits behind it so that restarts do
//! not hit the API again. Neither layer expires on anything but TTL or an
//! explicit `clear()`.

use crate::config::{AppConfig, Mode};
use crate::models::ProductionTable;
use crate::pipeline::FetchStats;
use crate::storage::Repository;
use anyhow::Result;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub fn cache_key(end: NaiveDate) -> String {
    format!("production:{}", end)
}

pub trait ProductionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<ProductionTable>;
    fn put(&self, key: &str, table: &ProductionTable);
    fn clear(&self);

    /// Bookkeeping hook for completed fetch cycles.
    fn record_fetch(&self, _end: NaiveDate, _stats: &FetchStats) {}
}

// ── In-memory TTL cache ───────────────────────────────────────────────────────

struct Entry {
    key: String,
    stored_at: Instant,
    table: ProductionTable,
}

pub struct TtlCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<Vec<Entry>>,
}

impl TtlCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<ProductionTable> {
        let mut entries = self.entries.lock();
        entries.retain(|e| now.duration_since(e.stored_at) < self.ttl);
        entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.table.clone())
    }

    fn put_at(&self, key: &str, table: &ProductionTable, now: Instant) {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.key != key);
        // Oldest first: evict from the front.
        while entries.len() >= self.max_entries {
            entries.remove(0);
        }
        entries.push(Entry {
            key: key.to_string(),
            stored_at: now,
            table: table.clone(),
        });
    }
}

impl ProductionCache for TtlCache {
    fn get(&self, key: &str) -> Option<ProductionTable> {
        self.get_at(key, Instant::now())
    }

    fn put(&self, key: &str, table: &ProductionTable) {
        self.put_at(key, table, Instant::now());
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ── Disk cache ────────────────────────────────────────────────────────────────

/// DuckDB-backed cache. Storage errors are logged and treated as misses.
pub struct DiskCache {
    repo: Mutex<Repository>,
}

impl DiskCache {
    pub fn new(repo: Repository) -> Result<Self> {
        repo.run_migrations()?;
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }
}

impl ProductionCache for DiskCache {
    fn get(&self, key: &str) -> Option<ProductionTable> {
        match self.repo.lock().get_table(key) {
            Ok(table) => table,
            Err(e) => {
                warn!("Disk cache read failed for {}: {:#}", key, e);
                None
            }
        }
    }

    fn put(&self, key: &str, table: &ProductionTable) {
        if let Err(e) = self.repo.lock().put_table(key, table) {
            warn!("Disk cache write failed for {}: {:#}", key, e);
        }
    }

    fn clear(&self) {
        if let Err(e) = self.repo.lock().clear_tables() {
            warn!("Disk cache clear failed: {:#}", e);
        }
    }

    fn record_fetch(&self, end: NaiveDate, stats: &FetchStats) {
        if let Err(e) = self.repo.lock().record_fetch_run(end, stats) {
            warn!("Could not record fetch run: {:#}", e);
        }
    }
}

// ── Layered stack ─────────────────────────────────────────────────────────────

/// Layers are queried in order; a hit in a later layer is copied into the earlier ones.
pub struct CacheStack {
    layers: Vec<Box<dyn ProductionCache>>,
}

impl CacheStack {
    pub fn new(layers: Vec<Box<dyn ProductionCache>>) -> Self {
        Self { layers }
    }

    /// Memory TTL cache, plus the disk cache outside production mode.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut layers: Vec<Box<dyn ProductionCache>> = vec![Box::new(TtlCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ))];

        if config.mode != Mode::Production {
            let repo = Repository::open(&config.cache.disk_path)?;
            layers.push(Box::new(DiskCache::new(repo)?));
            info!("Disk cache enabled at {:?}", config.cache.disk_path);
        }

        Ok(Self::new(layers))
    }
}

/// Clear the on-disk cache from outside the serving process.
///
/// Returns the number of tables dropped, or `None` in production mode where
/// the only cache lives in the server's memory.
pub fn clear_disk_cache(config: &AppConfig) -> Result<Option<usize>> {
    if config.mode == Mode::Production {
        return Ok(None);
    }
    let repo = Repository::open(&config.cache.disk_path)?;
    repo.run_migrations()?;
    Ok(Some(repo.clear_tables()?))
}

impl ProductionCache for CacheStack {
    fn get(&self, key: &str) -> Option<ProductionTable> {
        for (depth, layer) in self.layers.iter().enumerate() {
            if let Some(table) = layer.get(key) {
                debug!("Cache hit for {} at layer {}", key, depth);
                for upper in &self.layers[..depth] {
                    upper.put(key, &table);
                }
                return Some(table);
            }
        }
        None
    }

    fn put(&self, key: &str, table: &ProductionTable) {
        for layer in &self.layers {
            layer.put(key, table);
        }
    }

    fn clear(&self) {
        for layer in &self.layers {
            layer.clear();
        }
        info!("Production cache cleared");
    }

    fn record_fetch(&self, end: NaiveDate, stats: &FetchStats) {
        for layer in &self.layers {
            layer.record_fetch(end, stats);
        }
    }
}
