//! Ledger service entry point.
//!
//! Opens the SQLite ledger, runs migrations and serves the investment,
//! check-in, request and admin REST API.

mod accounts;
mod admin;
mod api;
mod checkin;
mod config;
mod db;
mod errors;
mod evidence;
mod invest;
mod ledger;
mod plans;
mod platform;
mod requests;
mod settings;
mod store;

use std::sync::Arc;

use ledger_core::SystemClock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use evidence::FsEvidenceStore;
use platform::Platform;
use store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // The SQLite busy timeout shares the unit-of-work bound, so a lock wait
    // never outlives the attempt that is waiting.
    let pool = db::init_pool(&config.database_url, config.uow_timeout).await?;

    tokio::fs::create_dir_all(&config.evidence_dir).await?;
    let evidence = FsEvidenceStore::new(config.evidence_dir.clone());
    info!("Storing deposit evidence under {}", evidence.root().display());

    let platform = Platform::new(
        Store::new(pool, config.uow_timeout, config.uow_max_retries),
        Arc::new(SystemClock),
        config.calendar,
        Arc::new(evidence),
        config.min_withdrawal,
    );
    info!(
        "Business day starts at 00:00 {}; minimum withdrawal {} PKR",
        config.calendar.offset(),
        config.min_withdrawal
    );

    let api_state = Arc::new(api::ApiState { platform });
    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
