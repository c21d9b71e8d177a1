use crate::dashboard::Report;
use crate::utils::{fmt_kwc, fmt_value};
use anyhow::{Result, anyhow};
use askama::Template;

use super::chart::{Chart, line_chart_svg};

const CHART_WIDTH: u32 = 1100;
const CHART_HEIGHT: u32 = 420;

pub struct ActiveRowView {
    pub address: String,
    pub kwh_per_kwc: String,
    pub kwh: String,
    pub kwc: String,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardPage {
    pub day: String,
    pub active_chart: Chart,
    pub active_rows: Vec<ActiveRowView>,
    pub no_production: Vec<String>,
    pub no_data: Vec<String>,
    pub split_kwc: String,
    pub large_chart: Chart,
    pub small_chart: Chart,
    pub refresh_enabled: bool,
    pub message: Option<String>,
}

fn chart(table: &crate::models::SeriesTable, y_desc: &str) -> Result<Chart> {
    line_chart_svg(table, y_desc, CHART_WIDTH, CHART_HEIGHT).map_err(|e| anyhow!("chart: {e}"))
}

impl DashboardPage {
    pub fn from_report(
        report: &Report,
        refresh_enabled: bool,
        message: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            day: (report.day_end - chrono::Duration::days(1))
                .format("%Y-%m-%d")
                .to_string(),
            active_chart: chart(&report.active_trend, "Production [kWh/kWc]")?,
            active_rows: report
                .active_rows
                .iter()
                .map(|r| ActiveRowView {
                    address: r.address.clone(),
                    kwh_per_kwc: fmt_value(r.kwh_per_kwc),
                    kwh: fmt_value(r.kwh),
                    kwc: fmt_kwc(r.kwc),
                })
                .collect(),
            no_production: report.no_production.clone(),
            no_data: report.no_data.clone(),
            split_kwc: format!("{}", report.split_kwc),
            large_chart: chart(&report.large_sites, "Production [kWh]")?,
            small_chart: chart(&report.small_sites, "Production [kWh]")?,
            refresh_enabled,
            message,
        })
    }

    pub fn to_html(&self) -> Result<String> {
        Ok(self.render()?)
    }
}
