//! Daily alert routine: e-mail the sites that produced nothing or sent no data yesterday.

pub mod scheduler;

use crate::config::AlertConfig;
use crate::dashboard::Dashboard;
use crate::models::{SiteStatus, YesterdaySummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

pub const ALERT_SUBJECT: &str = "Alerte production PV";

/// Plain-text body listing inactive sites, `None` when every site is fine.
pub fn compose_alert(summary: &YesterdaySummary) -> Option<String> {
    let no_production = summary.with_status(SiteStatus::NoProduction);
    let no_data = summary.with_status(SiteStatus::NoData);

    let mut lines: Vec<String> = Vec::new();
    if !no_production.is_empty() {
        lines.push("Pas de production hier sur les centrales suivantes:".to_string());
        lines.extend(no_production.iter().map(|t| format!("- {}", t.address)));
    }
    if !no_data.is_empty() {
        lines.push(String::new());
        lines.push("Pas de données hier sur les centrales suivantes:".to_string());
        lines.extend(no_data.iter().map(|t| format!("- {}", t.address)));
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

// ── SendGrid client ───────────────────────────────────────────────────────────

pub struct SendGridClient {
    inner: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: String,
}

impl SendGridClient {
    pub fn new(config: &AlertConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            inner,
            base_url: config.sendgrid_base_url.trim_end_matches('/').to_string(),
            api_key: config.sendgrid_api_key.clone(),
            sender: config.sender_address.clone(),
        })
    }

    /// v3 mail payload: one personalization for all recipients, plain text only.
    pub fn payload(&self, subject: &str, body: &str, recipients: &[String]) -> serde_json::Value {
        json!({
            "personalizations": [{
                "to": recipients.iter().map(|r| json!({"email": r})).collect::<Vec<_>>(),
                "subject": subject,
            }],
            "from": {"email": self.sender},
            "content": [{"type": "text/plain", "value": body}],
        })
    }

    /// Send one message. Returns the HTTP status; non-2xx is not an error here.
    pub async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<u16> {
        let resp = self
            .inner
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.payload(subject, body, recipients))
            .send()
            .await
            .context("SendGrid request failed")?;

        let status = resp.status().as_u16();
        let details = resp.text().await.unwrap_or_default();
        info!(" - Sendgrid status={} - details={}", status, details);
        Ok(status)
    }
}

// ── Routine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RoutineOutcome {
    pub no_production: usize,
    pub no_data: usize,
    pub sent: bool,
}

/// Force a fresh fetch, classify yesterday and mail the result when alerts are configured.
/// Send failures are logged and never propagated.
pub async fn run_daily_routine(
    dashboard: &Dashboard,
    config: &AlertConfig,
    now: DateTime<Utc>,
) -> RoutineOutcome {
    dashboard.invalidate();
    let mut summary = dashboard.shaped(now).await.yesterday;
    summary.mark_errors();

    let mut outcome = RoutineOutcome {
        no_production: summary.with_status(SiteStatus::NoProduction).len(),
        no_data: summary.with_status(SiteStatus::NoData).len(),
        sent: false,
    };
    info!(
        "Daily check: {} sites without production, {} without data",
        outcome.no_production, outcome.no_data
    );

    if !config.is_active() {
        return outcome;
    }
    let Some(body) = compose_alert(&summary) else {
        return outcome;
    };

    let recipients = config.recipient_list();
    let result = match SendGridClient::new(config) {
        Ok(client) => client.send(ALERT_SUBJECT, &body, &recipients).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(status) if (200..300).contains(&status) => {
            outcome.sent = true;
            info!("Sent out warnings via Sendgrid");
        }
        Ok(status) => warn!("SendGrid rejected the alert (HTTP {})", status),
        Err(e) => warn!("Alert not sent: {:#}", e),
    }
    outcome
}
