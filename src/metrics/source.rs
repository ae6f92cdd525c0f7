//! Metric value sources

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use super::threshold::{MetricDefinition, SourceSpec};
use crate::error::FetchError;

/// Fetches the current value of one metric
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch_value(&self, metric: &MetricDefinition) -> Result<f64, FetchError>;
}

const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3/simple/price";
const DEFILLAMA_URL: &str = "https://api.llama.fi";
const FRED_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

/// HTTP client for the price, TVL and FRED indicator APIs
#[derive(Debug, Clone)]
pub struct HttpMetricSource {
    client: reqwest::Client,
    fred_api_key: Option<String>,
}

impl HttpMetricSource {
    pub fn new(timeout: Duration, fred_api_key: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            fred_api_key,
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<JsonValue, FetchError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch(&self, spec: &SourceSpec) -> Result<f64, FetchError> {
        match spec {
            SourceSpec::CoinGecko { id, vs_currency } => {
                let json = self
                    .get_json(COINGECKO_URL, &[("ids", id.as_str()), ("vs_currencies", vs_currency.as_str())])
                    .await?;
                coingecko_price(&json, id, vs_currency)
            }
            SourceSpec::DefiLlamaProtocol { protocol } => {
                let url = format!("{}/tvl/{}", DEFILLAMA_URL, protocol);
                let json = self.get_json(&url, &[]).await?;
                finite(json.as_f64(), "protocol tvl")
            }
            SourceSpec::DefiLlamaCategory { category } => {
                let url = format!("{}/protocols", DEFILLAMA_URL);
                let json = self.get_json(&url, &[]).await?;
                category_tvl(&json, category)
            }
            SourceSpec::Fred { series_id } => {
                let api_key = self
                    .fred_api_key
                    .as_deref()
                    .ok_or_else(|| FetchError::NotConfigured("FRED_API_KEY".to_string()))?;
                let json = self
                    .get_json(
                        FRED_URL,
                        &[
                            ("series_id", series_id.as_str()),
                            ("api_key", api_key),
                            ("file_type", "json"),
                            ("sort_order", "desc"),
                            ("limit", "10"),
                        ],
                    )
                    .await?;
                fred_latest(&json)
            }
        }
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn fetch_value(&self, metric: &MetricDefinition) -> Result<f64, FetchError> {
        self.fetch(&metric.source).await
    }
}

fn finite(value: Option<f64>, what: &str) -> Result<f64, FetchError> {
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| FetchError::Malformed(format!("missing or non-numeric {}", what)))
}

/// `{"bitcoin": {"usd": 64000.5}}`
pub fn coingecko_price(json: &JsonValue, id: &str, vs_currency: &str) -> Result<f64, FetchError> {
    finite(
        json.get(id).and_then(|c| c.get(vs_currency)).and_then(JsonValue::as_f64),
        "price",
    )
}

/// Sum of `tvl` over protocols whose category matches, ignoring case
pub fn category_tvl(json: &JsonValue, category: &str) -> Result<f64, FetchError> {
    let protocols = json
        .as_array()
        .ok_or_else(|| FetchError::Malformed("protocols is not an array".to_string()))?;

    let mut matched = 0usize;
    let total: f64 = protocols
        .iter()
        .filter(|p| {
            p.get("category")
                .and_then(JsonValue::as_str)
                .map_or(false, |c| c.eq_ignore_ascii_case(category))
        })
        .inspect(|_| matched += 1)
        .filter_map(|p| p.get("tvl").and_then(JsonValue::as_f64))
        .filter(|v| v.is_finite())
        .sum();

    if matched == 0 {
        return Err(FetchError::Malformed(format!(
            "no protocols in category {}",
            category
        )));
    }
    Ok(total)
}

/// Most recent numeric observation; FRED marks missing days with `"."`
pub fn fred_latest(json: &JsonValue) -> Result<f64, FetchError> {
    json.get("observations")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| FetchError::Malformed("missing observations".to_string()))?
        .iter()
        .filter_map(|o| o.get("value").and_then(JsonValue::as_str))
        .find_map(|v| v.parse::<f64>().ok().filter(|v| v.is_finite()))
        .ok_or_else(|| FetchError::Malformed("no numeric observation".to_string()))
}

/// Source answering from a fixed table; unknown metrics fail
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    values: Mutex<HashMap<String, f64>>,
}

impl StaticMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: f64) {
        self.values.lock().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) {
        self.values.lock().remove(name);
    }
}

#[async_trait]
impl MetricSource for StaticMetricSource {
    async fn fetch_value(&self, metric: &MetricDefinition) -> Result<f64, FetchError> {
        let value = self.values.lock().get(&metric.name).copied();
        value.ok_or_else(|| FetchError::Network(format!("{} unavailable", metric.name)))
    }
}
