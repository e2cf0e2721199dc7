/**
 * VIGIE COLLECTOR - Point d'entrée du collecteur de télémétrie
 *
 * RÔLE : charge la config (YAML + environnement), ouvre le registre
 * (SQLite ou mémoire) et sert l'API HTTP des agents et du dashboard.
 *
 * ARCHITECTURE : config figée au démarrage -> AppState (store + config) -> routeur Axum.
 */

mod config;
mod http;
mod ingest;
mod models;
mod state;
mod store;

use crate::config::load_config;
use crate::state::AppState;
use crate::store::open_store;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await.context("failed to load collector config")?;

    let store = open_store(&cfg.storage)
        .with_context(|| format!("failed to open registry store {}", cfg.storage.path.display()))?;
    info!(backend = store.backend(), "registry store ready");

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;

    let app = http::build_router(AppState::new(store, cfg));

    let listener = TcpListener::bind(addr).await.with_context(|| format!("cannot bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown requested");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
