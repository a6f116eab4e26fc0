use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

/// One way of locating a value inside a backend payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Named(&'static str),
    Index(usize), // Positional fallback for `[date, value]` pairs
}

impl FieldSource {
    /// Read this source from `value`; null counts as absent
    pub fn read<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let found = match self {
            FieldSource::Named(key) => value.as_object()?.get(*key),
            FieldSource::Index(index) => value.as_array()?.get(*index),
        };
        found.filter(|v| !v.is_null())
    }
}

/// Try each source in order and return the first hit
pub fn first_match<'a>(value: &'a Value, sources: &[FieldSource]) -> Option<&'a Value> {
    sources.iter().find_map(|source| source.read(value))
}

/// Same as [`first_match`] on an already-unwrapped object; positional sources never match
pub fn first_match_in<'a>(map: &'a Map<String, Value>, sources: &[FieldSource]) -> Option<&'a Value> {
    sources.iter().find_map(|source| match source {
        FieldSource::Named(key) => map.get(*key).filter(|v| !v.is_null()),
        FieldSource::Index(_) => None,
    })
}

use FieldSource::{Index, Named};

// -------------------- Run-level fields --------------------
pub const RUN_TIMESTAMP_FIELDS: &[FieldSource] = &[Named("timestamp"), Named("run_at"), Named("created_at")];
pub const RUN_STRATEGY_FIELDS: &[FieldSource] = &[Named("strategy"), Named("strategyId"), Named("strategy_id")];
pub const EQUITY_SERIES_FIELDS: &[FieldSource] = &[
    Named("equity_curve"),
    Named("equitySeries"),
    Named("equity_series"),
    Named("equity"),
];
pub const TRADES_FIELDS: &[FieldSource] = &[Named("trades"), Named("trade_log"), Named("tradeList")];
pub const SUMMARY_FIELDS: &[FieldSource] = &[
    Named("summary"),
    Named("summaryMetrics"),
    Named("summary_metrics"),
    Named("metrics"),
    Named("stats"),
];

// -------------------- Equity samples --------------------
pub const EQUITY_DATE_FIELDS: &[FieldSource] = &[
    Named("date"),
    Named("Date"),
    Named("datetime"),
    Named("timestamp"),
    Index(0),
];
pub const EQUITY_VALUE_FIELDS: &[FieldSource] = &[
    Named("portfolio_equity"),
    Named("equity"),
    Named("Equity"),
    Named("value"),
    Index(1),
];

// -------------------- Trades --------------------
pub const TRADE_PNL_FIELDS: &[FieldSource] = &[
    Named("PnL"),
    Named("pnl"),
    Named("profit"),
    Named("Profit"),
    Named("net_pnl"),
];
pub const TRADE_DATE_FIELDS: &[FieldSource] = &[Named("date"), Named("Date"), Named("exit_date")];
pub const TRADE_ACTION_FIELDS: &[FieldSource] = &[Named("action"), Named("Action"), Named("side"), Named("type")];
pub const TRADE_PRICE_FIELDS: &[FieldSource] = &[Named("price"), Named("Price"), Named("exit_price")];

// -------------------- Reported summary values --------------------
pub const REPORTED_WIN_RATE_FIELDS: &[FieldSource] = &[
    Named("win_rate"),
    Named("winRate"),
    Named("Win Rate"),
    Named("Win Rate [%]"),
    Named("win_rate_pct"),
];
pub const REPORTED_TRADE_COUNT_FIELDS: &[FieldSource] = &[
    Named("trade_count"),
    Named("tradeCount"),
    Named("total_trades"),
    Named("num_trades"),
    Named("# Trades"),
];

/// Numbers, or strings holding a finite number (thousands separators allowed)
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Strings as-is, numbers and booleans rendered
pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a date-ish value into a sortable instant plus the label to display.
/// String labels are kept verbatim; epoch numbers render as `YYYY-MM-DD`.
pub fn parse_date(value: &Value) -> Option<(NaiveDateTime, String)> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            parse_date_str(trimmed).map(|at| (at, trimmed.to_string()))
        }
        Value::Number(n) => {
            let at = epoch_to_datetime(n.as_f64()?)?;
            Some((at, at.date().format("%Y-%m-%d").to_string()))
        }
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(s, format) {
            return Some(at);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// Values at or above 1e11 are treated as milliseconds (pandas' default JSON date unit)
fn epoch_to_datetime(raw: f64) -> Option<NaiveDateTime> {
    if !raw.is_finite() {
        return None;
    }
    let millis = if raw.abs() >= 1e11 { raw } else { raw * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64).map(|at| at.naive_utc())
}
