//! Scholia Purge Job
//!
//! Permanently removes artifacts whose restore window has elapsed.
//! Runs once per invocation; schedule it externally (cron, systemd timer).

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use scholia_server::config::Config;
use scholia_server::PolicyEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scholia_server=info,scholia_purge=info".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        restore_window_days = config.restore_window_days,
        shared_caches = config.has_redis(),
        "Starting purge job"
    );

    let engine = PolicyEngine::from_config(&config).await?;
    let purged = engine.purge_expired(Utc::now()).await?;

    info!(purged, "Purge job finished");
    Ok(())
}
