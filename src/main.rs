use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use feedwarden::config::Config;
use feedwarden::feed::HttpFetcher;
use feedwarden::guard::UrlGuard;
use feedwarden::ratelimit::DomainRateLimiter;
use feedwarden::scheduler::Scheduler;
use feedwarden::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(
    name = "feedwarden",
    about = "Polite, SSRF-hardened polling scheduler for RSS/Atom feeds"
)]
struct Args {
    /// Path to the TOML config file (missing file means defaults)
    #[arg(long, value_name = "FILE", default_value = "feedwarden.toml")]
    config: PathBuf,

    /// Run a single update cycle, print its summary as JSON, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (RUST_LOG controls verbosity)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: {} is locked by another process. Stop it and try again.",
                config.database_path
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let guard = UrlGuard::new(config.guard_config());
    if guard.config().allow_loopback {
        tracing::warn!("Loopback feed URLs are allowed; do not use this setting in production");
    }
    let fetcher = HttpFetcher::new(guard, db.clone(), &config.user_agent)
        .context("Failed to build HTTP client")?;
    let limiter = Arc::new(DomainRateLimiter::new(config.rate_limiter_config()));

    let scheduler = Scheduler::new(
        Arc::new(db),
        Arc::new(fetcher),
        Arc::clone(&limiter),
        config.scheduler_config(),
    );

    let rate = limiter.config();
    let timing = scheduler.config();
    tracing::info!(
        requests_per_minute = rate.requests_per_minute,
        burst_size = rate.burst_size,
        update_window_secs = timing.update_window.as_secs(),
        max_concurrent = timing.max_concurrent,
        "Scheduler configured"
    );

    if args.once {
        let summary = scheduler.run_once().await;
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode cycle summary")?
        );
        return Ok(());
    }

    scheduler.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.stop();
    scheduler.wait_stopped().await;
    tracing::info!(status = ?scheduler.status(), "Scheduler stopped");
    Ok(())
}
