pub mod http_client;
pub mod parsers;

use crate::config::EnedisConfig;
use crate::models::ProductionReading;
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

use self::http_client::HttpClient;
use self::parsers::{LoadCurveResponse, to_readings};

const PRODUCTION_LOAD_CURVE_PATH: &str = "metering_data_plc/v5/production_load_curve";

/// Timestamps on the gateway are expressed in French local time.
pub const ENEDIS_TIMEZONE: Tz = chrono_tz::Europe::Paris;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("invalid response: {0}")]
    Parse(String),
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable production source.
#[async_trait]
pub trait ProductionSource: Send + Sync {
    /// Half-hourly production of one metering point over `[start, end)`.
    async fn production_half_hourly(
        &self,
        prm: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProductionReading>, SourceError>;
}

// ── Enedis client ─────────────────────────────────────────────────────────────

pub struct EnedisClient {
    client: HttpClient,
}

impl EnedisClient {
    pub fn new(config: &EnedisConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl ProductionSource for EnedisClient {
    async fn production_half_hourly(
        &self,
        prm: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProductionReading>, SourceError> {
        let query = [
            ("usage_point_id", prm.to_string()),
            ("start", start.format("%Y-%m-%d").to_string()),
            ("end", end.format("%Y-%m-%d").to_string()),
        ];

        let resp: LoadCurveResponse = self
            .client
            .get_json(PRODUCTION_LOAD_CURVE_PATH, &query)
            .await?;

        if let Some(id) = resp.meter_reading.usage_point_id.as_deref() {
            if id != prm {
                return Err(SourceError::Parse(format!(
                    "asked for {} but received {}",
                    prm, id
                )));
            }
        }

        let readings = to_readings(resp, ENEDIS_TIMEZONE);
        debug!("{}: {} readings {} → {}", prm, readings.len(), start, end);
        Ok(readings)
    }
}
