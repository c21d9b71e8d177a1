//! One request/render cycle: cached fetch → shape → page sections.
//!
//! Every call re-runs the whole pipeline against the current cache state.
//! Concurrent requests are not coordinated; two cold requests may both fetch.

pub mod report;

use crate::cache::{ProductionCache, cache_key};
use crate::config::AppConfig;
use crate::enedis::ProductionSource;
use crate::models::{ProductionTable, SiteRegistry};
use crate::pipeline::fetch_production;
use crate::shaper::{ShapedSeries, midnight_utc, shape};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use self::report::{Report, build_report};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Rafraîchissement désactivé (aucun mot de passe configuré)")]
    Disabled,

    #[error("Mot de passe erroné")]
    WrongPassword,
}

pub struct Dashboard {
    config: Arc<AppConfig>,
    registry: Arc<SiteRegistry>,
    source: Arc<dyn ProductionSource>,
    cache: Arc<dyn ProductionCache>,
}

impl Dashboard {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<SiteRegistry>,
        source: Arc<dyn ProductionSource>,
        cache: Arc<dyn ProductionCache>,
    ) -> Self {
        Self {
            config,
            registry,
            source,
            cache,
        }
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn refresh_enabled(&self) -> bool {
        !self.config.server.refresh_password.is_empty()
    }

    /// Production window ending at `end`, from cache when available.
    pub async fn production(&self, end: NaiveDate) -> ProductionTable {
        let key = cache_key(end);
        if let Some(raw) = self.cache.get(&key) {
            return raw;
        }

        let (raw, stats) = fetch_production(
            self.source.as_ref(),
            &self.registry,
            end,
            self.config.pipeline.lookback_days,
        )
        .await;
        self.cache.record_fetch(end, &stats);
        self.cache.put(&key, &raw);
        raw
    }

    pub async fn shaped(&self, now: DateTime<Utc>) -> ShapedSeries {
        let t0 = midnight_utc(now);
        let raw = self.production(t0.date_naive()).await;
        shape(&raw, &self.registry, t0, self.config.pipeline.trend_hours)
    }

    pub async fn report(&self, now: DateTime<Utc>) -> Report {
        let shaped = self.shaped(now).await;
        build_report(
            shaped,
            &self.registry,
            self.config.pipeline.capacity_split_kwc,
            midnight_utc(now),
        )
    }

    /// Drop every cached table so the next cycle fetches again.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Password-gated invalidation. No lockout on failure.
    pub fn refresh(&self, password: &str) -> Result<(), RefreshError> {
        if !self.refresh_enabled() {
            return Err(RefreshError::Disabled);
        }
        if password != self.config.server.refresh_password {
            warn!("Refresh rejected: wrong password");
            return Err(RefreshError::WrongPassword);
        }
        self.invalidate();
        info!("Manual refresh: cache cleared");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::enedis::SourceError;
    use crate::models::{ProductionReading, SiteStatus};
    use crate::pipeline::half_hour_grid;
    use crate::pipeline::tests::{FakeSource, registry};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts calls made to the wrapped source.
    struct Counting {
        inner: FakeSource,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProductionSource for Counting {
        async fn production_half_hourly(
            &self,
            prm: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<ProductionReading>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.production_half_hourly(prm, start, end).await
        }
    }

    pub(crate) fn test_dashboard(password: &str) -> Dashboard {
        let mut config = AppConfig::default();
        config.server.refresh_password = password.to_string();

        let source = FakeSource {
            wh: HashMap::from([
                ("a".to_string(), Some(2000.0)),
                ("b".to_string(), Some(0.0)),
                ("c".to_string(), None),
            ]),
        };
        Dashboard::new(
            Arc::new(config),
            Arc::new(registry(&[("a", Some(50.0)), ("b", Some(9.0)), ("c", Some(3.0))])),
            Arc::new(source),
            Arc::new(TtlCache::new(Duration::from_secs(60), 2)),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 9, 15, 0).unwrap()
    }

    #[tokio::test]
    async fn test_report_classifies_sites() {
        let dashboard = test_dashboard("secret");
        let report = dashboard.report(now()).await;

        assert_eq!(report.active_rows.len(), 1);
        assert_eq!(report.active_rows[0].address, "addr-a");
        // 2 kWh per bucket, hourly means summed over 24 h.
        assert!((report.active_rows[0].kwh - 48.0).abs() < 1e-9);
        assert_eq!(report.no_production, vec!["addr-b"]);
        assert_eq!(report.no_data, vec!["addr-c"]);
        assert_eq!(report.summary.get("c").unwrap().status(), SiteStatus::NoData);
        assert_eq!(report.large_sites.columns, vec!["addr-a"]);
    }

    #[tokio::test]
    async fn test_cache_prevents_refetch_until_refresh() {
        let counting = Arc::new(Counting {
            inner: FakeSource {
                wh: HashMap::from([("a".to_string(), Some(100.0))]),
            },
            calls: AtomicUsize::new(0),
        });
        let mut config = test_dashboard("pw").config.as_ref().clone();
        config.server.refresh_password = "pw".into();
        let dashboard = Dashboard::new(
            Arc::new(config),
            Arc::new(registry(&[("a", Some(3.0))])),
            counting.clone(),
            Arc::new(TtlCache::new(Duration::from_secs(60), 2)),
        );

        dashboard.report(now()).await;
        dashboard.report(now()).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        assert_eq!(dashboard.refresh("nope"), Err(RefreshError::WrongPassword));
        dashboard.report(now()).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        assert_eq!(dashboard.refresh("pw"), Ok(()));
        dashboard.report(now()).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_disabled_without_password() {
        let dashboard = test_dashboard("");
        assert!(!dashboard.refresh_enabled());
        assert_eq!(dashboard.refresh(""), Err(RefreshError::Disabled));
    }

    #[test]
    fn test_production_window() {
        let dashboard = test_dashboard("x");
        let end = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
        let raw = tokio_test::block_on(dashboard.production(end));
        assert_eq!(raw.start, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(raw.table.index, half_hour_grid(raw.start, end));
    }
}
