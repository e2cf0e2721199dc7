//! Vigie Agent - Multi-OS telemetry agent
//!
//! Periodically samples local resource usage and pushes it to a Vigie collector:
//! - CPU, memory, disk usage and network throughput through a metrics source
//! - Battery level from sysfs or the Termux helper
//! - Fire-and-forget HTTP reports on a fixed cadence
//! - Cross-platform support (Linux, Windows, macOS, Android/Termux)

mod config;
mod metrics;
mod reporter;
mod sampler;
mod schedule;

use anyhow::{Context, Result};
use config::AgentConfig;
use reporter::Reporter;
use sampler::Sampler;
use schedule::Cadence;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Vigie Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().await.context("Failed to load agent configuration")?;
    let platform = config.platform.resolve(|k| std::env::var(k).ok());

    info!(
        "Device {} ({}) on {:?} platform, reporting to {} with token {}",
        config.identity.id,
        config.identity.name,
        platform,
        config.server_url,
        config.masked_token()
    );

    let sampler = Sampler::new(metrics::select_source(platform), config.sampling_window);
    let reporter = Reporter::new(&config.server_url, &config.token, config.identity.clone());
    let cadence = Cadence {
        report_interval: config.report_interval,
        sampling_window: sampler.window(),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping");
                on_interrupt.cancel();
            }
            Err(e) => warn!("Cannot listen for interrupt: {}", e),
        }
    });

    reporter::run(sampler, reporter, cadence, cancel).await;

    info!("Vigie Agent stopped");
    Ok(())
}
