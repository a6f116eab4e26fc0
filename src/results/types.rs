use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extract::{
    self, EQUITY_SERIES_FIELDS, RUN_STRATEGY_FIELDS, RUN_TIMESTAMP_FIELDS, SUMMARY_FIELDS, TRADES_FIELDS,
};

/// A backtest run as returned by the backend. The shape is not under our control, so fields are
/// resolved lazily through the extraction strategies in [`extract`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RunRecord {
    fields: Map<String, Value>,
}

impl RunRecord {
    /// Accept any JSON object; anything else is not a run
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn timestamp(&self) -> Option<&Value> {
        extract::first_match_in(&self.fields, RUN_TIMESTAMP_FIELDS)
    }

    /// Ordering key; `None` when missing or unparseable
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp().and_then(extract::parse_date).map(|(at, _)| at)
    }

    pub fn strategy_id(&self) -> Option<String> {
        extract::first_match_in(&self.fields, RUN_STRATEGY_FIELDS).and_then(extract::coerce_string)
    }

    pub fn equity_series(&self) -> Option<&Value> {
        extract::first_match_in(&self.fields, EQUITY_SERIES_FIELDS)
    }

    /// Trade events; empty when missing or not a list
    pub fn trades(&self) -> &[Value] {
        extract::first_match_in(&self.fields, TRADES_FIELDS)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn summary_metrics(&self) -> Option<&Map<String, Value>> {
        extract::first_match_in(&self.fields, SUMMARY_FIELDS).and_then(Value::as_object)
    }

    /// Whether a payload carries run content (an equity series or trades)
    pub fn looks_like_run(value: &Value) -> bool {
        extract::first_match(value, EQUITY_SERIES_FIELDS).is_some()
            || extract::first_match(value, TRADES_FIELDS).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: String,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
}

/// A trade with its fields resolved; `pnl` is `None` when missing or unparseable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    pub date: Option<String>,
    pub action: Option<String>,
    pub price: Option<f64>,
    pub pnl: Option<f64>,
    pub outcome: TradeOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedSummary {
    pub total_pnl: f64,
    pub win_rate: f64, // Fraction in [0, 1]
    pub trade_count: usize,
}

/// Aggregates shown next to the charts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "values", rename_all = "lowercase")]
pub enum RunSummary {
    Reported(Map<String, Value>), // Verbatim from the backend
    Derived(DerivedSummary),
}

/// A reported aggregate that disagrees with what the trade list says
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SummaryMismatch {
    WinRate { reported: f64, derived: f64 },
    TradeCount { reported: u64, derived: usize },
}

/// What the normalizer had to leave out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationReport {
    pub unparseable_equity: usize,
    pub unparseable_dates: usize,
    pub duplicate_dates: usize,
    pub unparseable_pnl: usize,
}

impl NormalizationReport {
    pub fn excluded_points(&self) -> usize {
        self.unparseable_equity + self.unparseable_dates + self.duplicate_dates
    }
}

/// Chart-ready view of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartModel {
    pub equity_points: Vec<EquityPoint>,
    pub win_count: usize,
    pub loss_count: usize,
    pub summary: RunSummary,
    pub mismatches: Vec<SummaryMismatch>,
    pub report: NormalizationReport,
}

impl ChartModel {
    pub fn trade_count(&self) -> usize {
        self.win_count + self.loss_count
    }

    pub fn win_rate(&self) -> f64 {
        match self.trade_count() {
            0 => 0.0,
            n => self.win_count as f64 / n as f64,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn final_equity(&self) -> Option<f64> {
        self.equity_points.last().map(|p| p.equity)
    }
}
