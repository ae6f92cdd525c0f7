//! Catalyst Radar
//!
//! Run with: cargo run
//!
//! Performs a single scan and exits; schedule it with cron or a CI job.
//! See `catalyst_radar::config` for the environment variables it reads.
//! RUST_LOG controls the log level (default: catalyst_radar=info).

use std::sync::Arc;

use catalyst_radar::calendar::InvestingScraper;
use catalyst_radar::clock::{Clock, SystemClock};
use catalyst_radar::metrics::HttpMetricSource;
use catalyst_radar::notify::Notifier;
use catalyst_radar::store::FileBackend;
use catalyst_radar::{Radar, RadarConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalyst_radar=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RadarConfig::from_env()?;

    tracing::info!("Catalyst Radar configuration:");
    tracing::info!("  Data dir: {}", config.data_dir.display());
    tracing::info!("  Window: {} days", config.window_days);
    tracing::info!("  Warning lead: {} hours", config.warning_hours);
    tracing::info!(
        "  Calendar: {} (min impact {})",
        config.scraper.currency,
        config.scraper.min_impact
    );
    tracing::info!("  Metrics: {}", config.metrics.len());
    tracing::info!("  Notify targets: {}", config.targets.len());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = FileBackend::new(&config.data_dir)?;
    let scraper = InvestingScraper::new(config.scraper.clone(), clock.clone())?;
    let metric_source = HttpMetricSource::new(config.http_timeout, config.fred_api_key.clone())?;
    let notifier = Notifier::new(config.targets.clone(), config.http_timeout)?;

    let radar = Radar::new(
        Arc::new(backend),
        Arc::new(scraper),
        Arc::new(metric_source),
        Arc::new(notifier),
        clock,
    )
    .with_window_days(config.window_days)
    .with_warning_hours(config.warning_hours)
    .with_metrics(config.metrics, config.thresholds);

    match radar.run_once().await {
        Ok(report) => {
            tracing::info!(
                inserted = report.calendar.inserted,
                updated = report.calendar.updated,
                evicted = report.calendar.evicted,
                calendar_commit = ?report.calendar.commit,
                metrics_commit = ?report.metrics.commit,
                "Run complete"
            );
            if !report.failed.is_empty() {
                tracing::warn!(
                    failed = report.failed.len(),
                    "Some notifications were not delivered and will be retried"
                );
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            Err(e.into())
        }
    }
}
