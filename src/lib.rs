//! Catalyst Radar: market-catalyst monitoring
//!
//! Each invocation scrapes the economic calendar for high-impact events,
//! keeps a rolling window of them on disk, and sends one advance warning
//! and one release notice per event. It also polls a set of market metrics
//! and notifies when a reading moves past its threshold.
//!
//! # Features
//!
//! - **Rolling window**: merge scraped events by a stable key, trim to the window
//! - **At-most-once triggers**: sent-flags persisted only after delivery is acknowledged
//! - **Metric thresholds**: relative percent or any-change rules per metric
//! - **Guarded persistence**: compare-and-swap writes so overlapping runs never clobber each other
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use catalyst_radar::calendar::StaticEventSource;
//! use catalyst_radar::clock::SystemClock;
//! use catalyst_radar::metrics::StaticMetricSource;
//! use catalyst_radar::notify::RecordingDispatcher;
//! use catalyst_radar::store::MemoryBackend;
//! use catalyst_radar::Radar;
//!
//! # async fn run() -> Result<(), catalyst_radar::RadarError> {
//! let radar = Radar::new(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(StaticEventSource::new(vec![])),
//!     Arc::new(StaticMetricSource::new()),
//!     Arc::new(RecordingDispatcher::new()),
//!     Arc::new(SystemClock),
//! );
//! let report = radar.run_once().await?;
//! println!("sent {} notifications", report.sent.len());
//! # Ok(())
//! # }
//! ```

pub mod calendar;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod radar;
pub mod store;

// Re-export commonly used types
pub use config::RadarConfig;
pub use error::{ConfigError, FetchError, RadarError};
pub use radar::{CommitStatus, Radar, RunReport};
