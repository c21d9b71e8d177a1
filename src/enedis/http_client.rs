use crate::config::EnedisConfig;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use super::SourceError;

const TOKEN_PATH: &str = "oauth2/v3/token";

/// Tokens are renewed this long before the server-side expiry.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Authenticated HTTP client for the Enedis gateway (OAuth2 client credentials).
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl HttpClient {
    pub fn new(config: &EnedisConfig) -> Result<Self, SourceError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;

        // Trailing slash so that `join` appends instead of replacing the last segment.
        let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))?;

        Ok(Self {
            inner,
            base_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: Mutex::new(None),
        })
    }

    /// Current bearer token, requesting a new one when missing or about to expire.
    async fn bearer(&self) -> Result<String, SourceError> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|t| Instant::now() + TOKEN_MARGIN < t.expires_at)
            .map(|t| t.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }

        let url = self.base_url.join(TOKEN_PATH)?;
        debug!("POST {}", url);

        let resp = self
            .inner
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Auth(status.as_u16()));
        }

        let body: TokenResponse = resp.json().await?;
        let value = body.access_token;
        *self.token.lock() = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });
        Ok(value)
    }

    /// GET a JSON document relative to the gateway base URL.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let token = self.bearer().await?;
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        debug!("GET {} {:?}", url, query);

        let resp = self
            .inner
            .get(url.clone())
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            // Token revoked server-side: drop it so the next cycle re-authenticates.
            self.token.lock().take();
            return Err(SourceError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| SourceError::Parse(e.to_string()))
    }
}
