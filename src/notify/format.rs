//! Human-readable message text (Telegram HTML)

use super::intent::{MetricChangeNotice, NotificationIntent, ReleaseNotice, WarningNotice};
use crate::metrics::ComparisonMode;

/// Render an intent as an HTML message
pub fn format_intent(intent: &NotificationIntent) -> String {
    match intent {
        NotificationIntent::Warning(n) => format_warning(n),
        NotificationIntent::Release(n) => format_release(n),
        NotificationIntent::MetricChange(n) => format_metric_change(n),
    }
}

pub fn format_warning(n: &WarningNotice) -> String {
    format!(
        "⚠️ <b>Upcoming Catalyst ({})</b>\n\n{} <b>{}</b>\n📅 {}\n📊 Forecast: <b>{}</b>\n⚡ Impact: <b>{}</b>",
        format_hours(n.hours_remaining),
        n.impact.marker(),
        escape(&n.title),
        n.scheduled_time.format("%Y-%m-%d %H:%M UTC"),
        escape(n.forecast.as_deref().unwrap_or("N/A")),
        n.impact,
    )
}

pub fn format_release(n: &ReleaseNotice) -> String {
    let mut text = format!(
        "📢 <b>Data Release</b>\n\n{} <b>{}</b>\n📊 Actual: <b>{}</b>\n🎯 Forecast: {}\n📍 Previous: {}",
        n.impact.marker(),
        escape(&n.title),
        escape(&n.actual),
        escape(n.forecast.as_deref().unwrap_or("N/A")),
        escape(n.previous.as_deref().unwrap_or("N/A")),
    );

    if let Some(dev) = n.deviation {
        let marker = if dev.absolute >= 0.0 { "🟢" } else { "🔴" };
        text.push_str(&format!(
            "\n{} Deviation: {} ({:+.1}%)",
            marker,
            compact_signed(dev.absolute),
            dev.percent
        ));
    }

    text.push_str(&format!(
        "\n\n⏰ Released: {}",
        n.scheduled_time.format("%Y-%m-%d %H:%M UTC")
    ));
    text
}

pub fn format_metric_change(n: &MetricChangeNotice) -> String {
    let headline = match (n.mode, n.change_percent) {
        (ComparisonMode::RelativePercent, Some(pct)) => {
            let arrow = if pct >= 0.0 { "📈" } else { "📉" };
            format!("{} <b>{}</b> moved {:+.2}%", arrow, escape(&n.metric), pct)
        }
        _ => format!("🔁 <b>{}</b> changed", escape(&n.metric)),
    };

    format!(
        "{}\n{} → <b>{}</b> ({})\n🕒 {}",
        headline,
        compact(n.previous),
        compact(n.current),
        compact_signed(n.current - n.previous),
        n.observed_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

/// `11h` for whole hours, `10.5h` otherwise
pub fn format_hours(hours: f64) -> String {
    let rounded = (hours * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}h", rounded)
    } else {
        format!("{:.1}h", rounded)
    }
}

fn compact(value: f64) -> String {
    let abs = value.abs();
    let (scaled, suffix) = if abs >= 1e12 {
        (value / 1e12, "T")
    } else if abs >= 1e9 {
        (value / 1e9, "B")
    } else if abs >= 1e6 {
        (value / 1e6, "M")
    } else if abs >= 1e3 {
        (value / 1e3, "K")
    } else {
        (value, "")
    };
    format!("{:.2}{}", scaled, suffix)
}

fn compact_signed(value: f64) -> String {
    if value >= 0.0 {
        format!("+{}", compact(value))
    } else {
        compact(value)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
