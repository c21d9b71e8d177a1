use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{Site, SiteRegistry};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub sites: Vec<Site>,

    /// Optional CSV file (`prm,adresse,kwc`) appended to `sites`.
    #[serde(default)]
    pub sites_csv: Option<PathBuf>,

    #[serde(default)]
    pub enedis: EnedisConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// `Production` disables the disk cache.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

/// Enedis API client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnedisConfig {
    #[serde(default = "default_enedis_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Fetch and shaping windows
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    #[serde(default = "default_trend_hours")]
    pub trend_hours: i64,

    /// Sites above this capacity go to the "large sites" chart.
    #[serde(default = "default_capacity_split_kwc")]
    pub capacity_split_kwc: f64,
}

/// Production cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
}

/// Alert routine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub routines_active: bool,

    #[serde(default)]
    pub sendgrid_api_key: String,

    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,

    #[serde(default)]
    pub sender_address: String,

    /// Recipients separated by `;`.
    #[serde(default)]
    pub recipients: String,

    #[serde(default = "default_alert_hour")]
    pub hour: u32,

    #[serde(default = "default_alert_minute")]
    pub minute: u32,

    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl AlertConfig {
    pub fn recipient_list(&self) -> Vec<String> {
        self.recipients
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Alerts are only sent when both recipients and an API key are set.
    pub fn is_active(&self) -> bool {
        !self.recipient_list().is_empty() && !self.sendgrid_api_key.is_empty()
    }
}

/// HTTP dashboard configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Empty disables the manual refresh.
    #[serde(default)]
    pub refresh_password: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_enedis_base_url() -> String {
    "https://gw.ext.prod.api.enedis.fr".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "pv-dashboard/0.1".to_string()
}
fn default_lookback_days() -> i64 {
    3
}
fn default_trend_hours() -> i64 {
    4 * 24
}
fn default_capacity_split_kwc() -> f64 {
    36.0
}
fn default_ttl_secs() -> u64 {
    12 * 3600
}
fn default_max_entries() -> usize {
    2
}
fn default_disk_path() -> PathBuf {
    PathBuf::from(".data/cache.duckdb")
}
fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}
fn default_alert_hour() -> u32 {
    5
}
fn default_alert_minute() -> u32 {
    10
}
fn default_timezone() -> String {
    "Europe/Paris".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8501".to_string()
}

impl Default for EnedisConfig {
    fn default() -> Self {
        Self {
            base_url: default_enedis_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            trend_hours: default_trend_hours(),
            capacity_split_kwc: default_capacity_split_kwc(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            disk_path: default_disk_path(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            routines_active: false,
            sendgrid_api_key: String::new(),
            sendgrid_base_url: default_sendgrid_base_url(),
            sender_address: String::new(),
            recipients: String::new(),
            hour: default_alert_hour(),
            minute: default_alert_minute(),
            timezone: default_timezone(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            refresh_password: String::new(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("PVDASH").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(app_cfg)
    }

    /// Build the site registry from inline sites plus the optional CSV file.
    pub fn registry(&self) -> Result<SiteRegistry> {
        let mut sites = self.sites.clone();
        if let Some(path) = &self.sites_csv {
            sites.extend(crate::loader::load_sites_csv(path)?);
        }
        let registry = SiteRegistry::new(sites);
        if registry.is_empty() {
            bail!("No sites configured (set `sites` or `sites_csv`)");
        }
        Ok(registry)
    }
}
