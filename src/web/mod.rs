pub mod chart;
pub mod views;

use crate::dashboard::Dashboard;
use crate::models::SiteStatus;
use anyhow::{Context, Result};
use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use self::views::DashboardPage;

/// Application state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshForm {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SiteSummary {
    pub site_id: String,
    pub address: String,
    pub capacity_kwc: Option<f64>,
    pub total_kwh: f64,
    pub kwh_per_kwc: Option<f64>,
    pub status: SiteStatus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/refresh", post(refresh_handler))
        .route("/api/summary", get(summary_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")?;
    Ok(())
}

/// Full request/render cycle. Any failure turns into a 500 for this request only.
async fn render_page(state: &AppState, message: Option<String>) -> Response {
    let report = state.dashboard.report(Utc::now()).await;
    let page = DashboardPage::from_report(&report, state.dashboard.refresh_enabled(), message)
        .and_then(|page| page.to_html());

    match page {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Page render failed: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response()
        }
    }
}

async fn index_handler(State(state): State<AppState>) -> Response {
    render_page(&state, None).await
}

async fn refresh_handler(
    State(state): State<AppState>,
    Form(form): Form<RefreshForm>,
) -> Response {
    let message = match state.dashboard.refresh(&form.password) {
        Ok(()) => "Les données ont été rafraîchies".to_string(),
        Err(e) => e.to_string(),
    };
    render_page(&state, Some(message)).await
}

async fn summary_handler(State(state): State<AppState>) -> Json<Vec<SiteSummary>> {
    let report = state.dashboard.report(Utc::now()).await;
    Json(
        report
            .summary
            .totals
            .iter()
            .map(|t| SiteSummary {
                site_id: t.site_id.clone(),
                address: t.address.clone(),
                capacity_kwc: t.capacity_kwc,
                total_kwh: t.total_kwh,
                kwh_per_kwc: Some(t.kwh_per_kwc()).filter(|v| v.is_finite()),
                status: t.status(),
            })
            .collect(),
    )
}

async fn health_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::test_dashboard;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    fn app(password: &str) -> Router {
        router(AppState {
            dashboard: Arc::new(test_dashboard(password)),
        })
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let resp = app("")
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ok");
    }

    #[tokio::test]
    async fn test_index_lists_sections() {
        let resp = app("pw")
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let html = body_text(resp).await;
        assert!(html.contains("Centrales actives"));
        assert!(html.contains("addr-a"));
        assert!(html.contains("addr-b"));
        assert!(html.contains("addr-c"));
        assert!(html.contains("<svg"));
        assert!(html.contains("Rafraîchir les données"));
    }

    #[tokio::test]
    async fn test_wrong_password_reported_inline() {
        let resp = app("pw")
            .oneshot(
                Request::post("/refresh")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("password=nope"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("Mot de passe erroné"));
    }

    #[tokio::test]
    async fn test_summary_json() {
        let resp = app("")
            .oneshot(Request::get("/api/summary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        let statuses: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["active", "no_production", "no_data"]);
        assert_eq!(json[2]["total_kwh"], -1.0);
    }
}
