mod alerts;
mod cache;
mod config;
mod dashboard;
mod enedis;
mod loader;
mod models;
mod pipeline;
mod shaper;
mod storage;
mod utils;
mod web;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cache::CacheStack;
use crate::config::AppConfig;
use crate::dashboard::Dashboard;
use crate::enedis::EnedisClient;
use crate::models::SiteStatus;
use crate::web::AppState;

#[derive(Parser)]
#[command(name = "pv-dashboard", about = "Solar production dashboard", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the web dashboard (and the daily alert routine when enabled)
    Serve {
        /// Override `server.bind_addr`
        #[arg(short, long, env = "PVDASH_BIND")]
        bind: Option<String>,
    },

    /// Run one fetch cycle and print yesterday's totals
    Fetch,

    /// Run the alert routine once (for an external cron)
    Alert,

    /// List the configured sites
    Sites,

    /// Drop the on-disk production cache (development mode only)
    ClearCache,
}

fn build_dashboard(config: Arc<AppConfig>) -> Result<Arc<Dashboard>> {
    let registry = Arc::new(config.registry()?);
    let source = Arc::new(
        EnedisClient::new(&config.enedis).context("Failed to build Enedis client")?,
    );
    let cache = Arc::new(CacheStack::from_config(&config)?);
    Ok(Arc::new(Dashboard::new(config, registry, source, cache)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "pv_dashboard=info,warn",
        1 => "pv_dashboard=debug,tower_http=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = Arc::new(AppConfig::load()?);
    info!("Mode: {:?}", config.mode);

    match cli.command {
        Command::Serve { bind } => {
            let dashboard = build_dashboard(config.clone())?;
            info!("{} sites registered", dashboard.registry().len());

            if config.alerts.routines_active {
                alerts::scheduler::spawn_daily(dashboard.clone(), config.alerts.clone())?;
            }

            let bind = bind.unwrap_or_else(|| config.server.bind_addr.clone());
            web::serve(AppState { dashboard }, &bind).await?;
        }

        Command::Fetch => {
            let _t = utils::Timer::start("Fetch cycle");
            let dashboard = build_dashboard(config)?;
            let mut summary = dashboard.shaped(Utc::now()).await.yesterday;
            summary.mark_errors();

            println!("─────────────────────────────────────────────────────────");
            println!("  Production de la veille");
            println!("─────────────────────────────────────────────────────────");
            for t in &summary.totals {
                let status = match t.status() {
                    SiteStatus::Active => "active",
                    SiteStatus::NoProduction => "production à zéro",
                    SiteStatus::NoData => "données manquantes",
                };
                println!(
                    "  {:<32} {:>10} kWh {:>8} kWh/kWc  {}",
                    t.address,
                    utils::fmt_value(t.total_kwh),
                    utils::fmt_value(t.kwh_per_kwc()),
                    status
                );
            }
            println!("─────────────────────────────────────────────────────────");
        }

        Command::Alert => {
            let _t = utils::Timer::start("Alert routine");
            let dashboard = build_dashboard(config.clone())?;
            let outcome = alerts::run_daily_routine(&dashboard, &config.alerts, Utc::now()).await;
            info!(
                "Done: {} without production, {} without data, sent={}",
                outcome.no_production, outcome.no_data, outcome.sent
            );
        }

        Command::Sites => {
            let registry = config.registry()?;
            println!("{} sites:", registry.len());
            for s in registry.sites() {
                println!(
                    "  {}  {:<32} {:>8} kWc",
                    s.id,
                    s.address,
                    utils::fmt_kwc(s.capacity_kwc)
                );
            }
        }

        Command::ClearCache => match cache::clear_disk_cache(&config)? {
            Some(n) => println!("Disk cache cleared ({} tables).", n),
            None => bail!(
                "No persistent cache in production mode; use the refresh form of the running server"
            ),
        },
    }

    Ok(())
}
