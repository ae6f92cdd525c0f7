//! Calendar sources
//!
//! [`InvestingScraper`] posts to the investing.com calendar endpoint and
//! parses the returned table rows. Any failure surfaces as a [`FetchError`];
//! callers treat that as "no new data", never as an empty calendar.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use super::event::{ImpactLevel, RawEvent};
use crate::clock::Clock;
use crate::error::FetchError;

/// Producer of raw calendar records for the next `window_days`
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self, window_days: i64) -> Result<Vec<RawEvent>, FetchError>;
}

/// Source that replays a fixed batch
#[derive(Debug, Clone, Default)]
pub struct StaticEventSource {
    events: Vec<RawEvent>,
}

impl StaticEventSource {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    async fn fetch_events(&self, _window_days: i64) -> Result<Vec<RawEvent>, FetchError> {
        Ok(self.events.clone())
    }
}

const CALENDAR_URL: &str =
    "https://www.investing.com/economic-calendar/Service/getCalendarFilteredData";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Scraper settings
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub url: String,
    /// Currency code whose events are kept (e.g. `USD`)
    pub currency: String,
    /// Lowest impact level kept
    pub min_impact: ImpactLevel,
    /// Timezone id sent to the endpoint
    pub timezone_id: String,
    /// Offset of the timestamps the endpoint returns for `timezone_id`
    pub utc_offset_hours: i32,
    pub timeout: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            url: CALENDAR_URL.to_string(),
            currency: "USD".to_string(),
            min_impact: ImpactLevel::Medium,
            timezone_id: "8".to_string(),
            utc_offset_hours: 8,
            timeout: Duration::from_secs(30),
        }
    }
}

/// investing.com calendar scraper
pub struct InvestingScraper {
    client: reqwest::Client,
    config: ScraperConfig,
    clock: Arc<dyn Clock>,
}

impl InvestingScraper {
    pub fn new(config: ScraperConfig, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            config,
            clock,
        })
    }

    async fn fetch(&self, window_days: i64) -> Result<Vec<RawEvent>, FetchError> {
        let now = self.clock.now();
        let offset = self.offset()?;
        let local_today = now.with_timezone(&offset).date_naive();
        let date_from = local_today.format("%Y-%m-%d").to_string();
        let date_to = (local_today + chrono::Duration::days(window_days))
            .format("%Y-%m-%d")
            .to_string();

        tracing::info!(from = %date_from, to = %date_to, "Fetching economic calendar");

        let response = self
            .client
            .post(&self.config.url)
            .header("Accept", "*/*")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Origin", "https://www.investing.com")
            .header("Referer", "https://www.investing.com/economic-calendar/")
            .form(&[
                ("dateFrom", date_from.as_str()),
                ("dateTo", date_to.as_str()),
                ("currentTab", "custom"),
                ("limit_from", "0"),
                ("timeZone", self.config.timezone_id.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        // The endpoint wraps the table HTML in {"data": "..."}; fall back to
        // the raw body if it ever stops doing so.
        let html = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => json
                .get("data")
                .and_then(|d| d.as_str())
                .map(String::from)
                .ok_or_else(|| FetchError::Malformed("response has no data field".to_string()))?,
            Err(_) => body,
        };

        let events = retain_fetch_window(
            parse_calendar_html(&html, &self.config, offset),
            now,
            offset,
            window_days,
        );

        tracing::info!(
            events = events.len(),
            currency = %self.config.currency,
            "Scraped calendar events"
        );
        Ok(events)
    }

    fn offset(&self) -> Result<FixedOffset, FetchError> {
        FixedOffset::east_opt(self.config.utc_offset_hours * 3600).ok_or_else(|| {
            FetchError::NotConfigured(format!(
                "invalid utc offset {}h",
                self.config.utc_offset_hours
            ))
        })
    }
}

#[async_trait]
impl EventSource for InvestingScraper {
    async fn fetch_events(&self, window_days: i64) -> Result<Vec<RawEvent>, FetchError> {
        self.fetch(window_days).await
    }
}

/// Keep events from local midnight of `now`'s day (in `offset`) up to
/// `now + window_days`, so releases earlier today still get refreshed.
pub fn retain_fetch_window(
    events: Vec<RawEvent>,
    now: DateTime<Utc>,
    offset: FixedOffset,
    window_days: i64,
) -> Vec<RawEvent> {
    let window_start = now
        .with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now);
    let window_end = now + chrono::Duration::days(window_days);

    events
        .into_iter()
        .filter(|e| e.scheduled_time >= window_start && e.scheduled_time <= window_end)
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid calendar pattern"))
}

/// Parse event rows out of the calendar table HTML.
///
/// Rows that lack a timestamp, currency or impact cell, or that fall outside
/// the configured currency and impact filters, are skipped.
pub fn parse_calendar_html(html: &str, config: &ScraperConfig, offset: FixedOffset) -> Vec<RawEvent> {
    static ROW: OnceLock<Regex> = OnceLock::new();
    let row_re = regex(&ROW, r"(?s)<tr([^>]*)>(.*?)</tr>");

    let mut events = Vec::new();
    for caps in row_re.captures_iter(html) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());

        if !class_tokens(attrs).any(|c| c == "js-event-item") {
            continue;
        }

        match parse_row(attrs, body, config, offset) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(reason) => tracing::warn!(reason = %reason, "Skipping calendar row"),
        }
    }
    events
}

fn parse_row(
    attrs: &str,
    body: &str,
    config: &ScraperConfig,
    offset: FixedOffset,
) -> Result<Option<RawEvent>, String> {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let cell_re = regex(&CELL, r"(?s)<td([^>]*)>(.*?)</td>");

    let Some(datetime) = attribute(attrs, "data-event-datetime") else {
        return Ok(None);
    };
    let naive = NaiveDateTime::parse_from_str(&datetime, "%Y/%m/%d %H:%M:%S")
        .map_err(|e| format!("bad datetime {:?}: {}", datetime, e))?;
    let scheduled_time: DateTime<Utc> = offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| format!("ambiguous datetime {:?}", datetime))?
        .with_timezone(&Utc);

    let mut currency = None;
    let mut impact = None;
    let mut title = None;
    let mut forecast = None;
    let mut actual = None;
    let mut previous = None;

    for cell in cell_re.captures_iter(body) {
        let cell_attrs = cell.get(1).map_or("", |m| m.as_str());
        let text = cell_text(cell.get(2).map_or("", |m| m.as_str()));

        for class in class_tokens(cell_attrs) {
            match class {
                "flagCur" => currency = Some(text.clone()),
                "sentiment" => {
                    impact = match attribute(cell_attrs, "data-img_key").as_deref() {
                        Some("bull3") => Some(ImpactLevel::High),
                        Some("bull2") => Some(ImpactLevel::Medium),
                        Some("bull1") => Some(ImpactLevel::Low),
                        _ => None,
                    }
                }
                "event" => title = Some(text.clone()),
                "fore" => forecast = non_empty(&text),
                "act" => actual = non_empty(&text),
                "prev" => previous = non_empty(&text),
                _ => {}
            }
        }
    }

    let Some(currency) = currency else {
        return Ok(None);
    };
    if currency != config.currency {
        return Ok(None);
    }
    let Some(impact) = impact else {
        return Ok(None);
    };
    if impact < config.min_impact {
        return Ok(None);
    }

    Ok(Some(RawEvent {
        country: country_for_currency(&currency),
        title: title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown Event".to_string()),
        scheduled_time,
        impact,
        forecast,
        actual,
        previous,
    }))
}

fn class_tokens(attrs: &str) -> impl Iterator<Item = &str> {
    static CLASS: OnceLock<Regex> = OnceLock::new();
    let class_re = regex(&CLASS, r#"class="([^"]*)""#);
    class_re
        .captures(attrs)
        .and_then(|c| c.get(1))
        .map_or("", |m| m.as_str())
        .split_whitespace()
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = attrs.find(&needle)? + needle.len();
    let end = attrs[start..].find('"')? + start;
    Some(attrs[start..end].to_string())
}

/// Visible text of a cell: tags stripped, common entities decoded, whitespace collapsed
fn cell_text(inner: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag_re = regex(&TAG, r"<[^>]+>");
    let text = tag_re
        .replace_all(inner, " ")
        .replace("&nbsp;", " ")
        .replace('\u{a0}', " ")
        .replace("&amp;", "&")
        .replace("&#039;", "'")
        .replace("&quot;", "\"");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn country_for_currency(currency: &str) -> String {
    match currency {
        "USD" => "US",
        "EUR" => "EU",
        "GBP" => "UK",
        "JPY" => "JP",
        "CNY" => "CN",
        "CAD" => "CA",
        "AUD" => "AU",
        other => other,
    }
    .to_string()
}
