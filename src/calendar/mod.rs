//! Economic calendar tracking
//!
//! Scraped releases are merged into a persisted rolling window, and the
//! trigger evaluator decides which advance warnings and release notices are
//! due. Flags on each event make both notices fire at most once.

pub mod buckets;
pub mod event;
pub mod merger;
pub mod scraper;
pub mod trigger;

pub use buckets::{bucket_for, group_by_week, WeekBucket};
pub use event::{parse_figure, Event, EventKey, EventStatus, ImpactLevel, RawEvent};
pub use merger::{EventMerger, MergeOutcome, DEFAULT_WINDOW_DAYS};
pub use scraper::{EventSource, InvestingScraper, ScraperConfig, StaticEventSource};
pub use trigger::{EventTriggerEvaluator, FlagKind, DEFAULT_WARNING_HOURS};
