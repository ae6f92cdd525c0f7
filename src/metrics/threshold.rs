//! Per-metric threshold configuration

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a new reading is compared with the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Fire when `|new - last| / |last| * 100 >= threshold`
    RelativePercent,
    /// Fire on any numeric change; threshold must be 0
    AbsoluteAnyChange,
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonMode::RelativePercent => f.write_str("relative-percent"),
            ComparisonMode::AbsoluteAnyChange => f.write_str("absolute-any-change"),
        }
    }
}

/// Comparison rule for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric_name: String,
    pub mode: ComparisonMode,
    #[serde(default)]
    pub threshold: f64,
}

impl ThresholdRule {
    pub fn relative_percent(metric_name: impl Into<String>, threshold: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            mode: ComparisonMode::RelativePercent,
            threshold,
        }
    }

    pub fn any_change(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            mode: ComparisonMode::AbsoluteAnyChange,
            threshold: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ok = match self.mode {
            ComparisonMode::RelativePercent => self.threshold.is_finite() && self.threshold > 0.0,
            ComparisonMode::AbsoluteAnyChange => self.threshold == 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidMetrics(format!(
                "{}: threshold {} is not valid for {}",
                self.metric_name, self.threshold, self.mode
            )))
        }
    }
}

/// Where a metric's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    /// CoinGecko simple price
    CoinGecko {
        id: String,
        #[serde(default = "default_vs_currency")]
        vs_currency: String,
    },
    /// DefiLlama TVL of one protocol
    DefiLlamaProtocol { protocol: String },
    /// Summed DefiLlama TVL of every protocol in a category
    DefiLlamaCategory { category: String },
    /// Latest observation of a FRED series
    Fred { series_id: String },
}

fn default_vs_currency() -> String {
    "usd".to_string()
}

/// A tracked metric: its source and its rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub source: SourceSpec,
    pub mode: ComparisonMode,
    #[serde(default)]
    pub threshold: f64,
}

impl MetricDefinition {
    pub fn rule(&self) -> ThresholdRule {
        ThresholdRule {
            metric_name: self.name.clone(),
            mode: self.mode,
            threshold: self.threshold,
        }
    }
}

/// Shape of the optional metric table file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTable {
    pub metrics: Vec<MetricDefinition>,
}

/// Rules for every configured metric, fixed for the life of the process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdConfig {
    rules: BTreeMap<String, ThresholdRule>,
}

impl ThresholdConfig {
    pub fn from_rules(rules: impl IntoIterator<Item = ThresholdRule>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for rule in rules {
            rule.validate()?;
            if map.contains_key(&rule.metric_name) {
                return Err(ConfigError::InvalidMetrics(format!(
                    "duplicate metric {}",
                    rule.metric_name
                )));
            }
            map.insert(rule.metric_name.clone(), rule);
        }
        Ok(Self { rules: map })
    }

    pub fn from_definitions(defs: &[MetricDefinition]) -> Result<Self, ConfigError> {
        Self::from_rules(defs.iter().map(MetricDefinition::rule))
    }

    pub fn rule(&self, metric_name: &str) -> Option<&ThresholdRule> {
        self.rules.get(metric_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Built-in metric table used when no table file is configured
pub fn default_metrics() -> Vec<MetricDefinition> {
    let coin = |name: &str, id: &str| MetricDefinition {
        name: name.to_string(),
        source: SourceSpec::CoinGecko {
            id: id.to_string(),
            vs_currency: default_vs_currency(),
        },
        mode: ComparisonMode::RelativePercent,
        threshold: 5.0,
    };
    let fred = |name: &str, series: &str| MetricDefinition {
        name: name.to_string(),
        source: SourceSpec::Fred {
            series_id: series.to_string(),
        },
        mode: ComparisonMode::AbsoluteAnyChange,
        threshold: 0.0,
    };

    vec![
        coin("btc_price", "bitcoin"),
        coin("eth_price", "ethereum"),
        MetricDefinition {
            name: "rwa_tvl".to_string(),
            source: SourceSpec::DefiLlamaCategory {
                category: "RWA".to_string(),
            },
            mode: ComparisonMode::RelativePercent,
            threshold: 2.0,
        },
        fred("us10y_yield", "DGS10"),
        fred("fed_balance_sheet", "WALCL"),
        fred("reverse_repo", "RRPONTSYD"),
    ]
}
