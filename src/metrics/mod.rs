//! Market and macro metric tracking

pub mod detector;
pub mod source;
pub mod threshold;

pub use detector::MetricChangeDetector;
pub use source::{HttpMetricSource, MetricSource, StaticMetricSource};
pub use threshold::{
    default_metrics, ComparisonMode, MetricDefinition, MetricTable, SourceSpec, ThresholdConfig,
    ThresholdRule,
};
