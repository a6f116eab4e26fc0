use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::extract::{
    self, coerce_number, first_match, EQUITY_DATE_FIELDS, EQUITY_VALUE_FIELDS, REPORTED_TRADE_COUNT_FIELDS,
    REPORTED_WIN_RATE_FIELDS, TRADE_ACTION_FIELDS, TRADE_DATE_FIELDS, TRADE_PNL_FIELDS, TRADE_PRICE_FIELDS,
};
use super::types::{
    ChartModel, DerivedSummary, EquityPoint, NormalizationReport, RunRecord, RunSummary, SummaryMismatch,
    TradeEvent, TradeOutcome,
};

/// Allowed gap between a reported win rate and the one derived from trades (fraction, absorbs rounding)
pub const WIN_RATE_TOLERANCE: f64 = 0.005;

/// Convert a backend run into the chart model. Pure: malformed pieces are counted, never raised.
pub fn normalize(record: &RunRecord) -> ChartModel {
    let mut report = NormalizationReport::default();

    let equity_points = extract_equity_points(record.equity_series(), &mut report);

    let trades = trade_events(record);
    let win_count = trades.iter().filter(|t| t.outcome == TradeOutcome::Win).count();
    let loss_count = trades.len() - win_count;
    report.unparseable_pnl = trades.iter().filter(|t| t.pnl.is_none()).count();

    let derived = derive_summary(&trades);
    let (summary, mismatches) = match record.summary_metrics() {
        Some(reported) => {
            let mismatches = check_reported_summary(reported, &derived);
            (RunSummary::Reported(reported.clone()), mismatches)
        }
        None => (RunSummary::Derived(derived), Vec::new()),
    };

    if !mismatches.is_empty() {
        warn!(
            strategy = ?record.strategy_id(),
            mismatches = ?mismatches,
            "Reported run summary disagrees with trade list"
        );
    }
    if report != NormalizationReport::default() {
        debug!(report = ?report, "Run normalized with excluded values");
    }

    ChartModel {
        equity_points,
        win_count,
        loss_count,
        summary,
        mismatches,
        report,
    }
}

/// Win/loss rule shared by every count in the crate: only a strictly positive PnL is a win
pub fn classify_pnl(pnl: Option<f64>) -> TradeOutcome {
    match pnl {
        Some(value) if value > 0.0 => TradeOutcome::Win,
        _ => TradeOutcome::Loss,
    }
}

/// Resolve every trade of a run. Non-object entries still count, as losses with no fields.
pub fn trade_events(record: &RunRecord) -> Vec<TradeEvent> {
    record
        .trades()
        .iter()
        .map(|trade| {
            let pnl = first_match(trade, TRADE_PNL_FIELDS).and_then(coerce_number);
            TradeEvent {
                date: first_match(trade, TRADE_DATE_FIELDS).and_then(extract::coerce_string),
                action: first_match(trade, TRADE_ACTION_FIELDS).and_then(extract::coerce_string),
                price: first_match(trade, TRADE_PRICE_FIELDS).and_then(coerce_number),
                pnl,
                outcome: classify_pnl(pnl),
            }
        })
        .collect()
}

pub fn derive_summary(trades: &[TradeEvent]) -> DerivedSummary {
    let wins = trades.iter().filter(|t| t.outcome == TradeOutcome::Win).count();
    DerivedSummary {
        total_pnl: trades.iter().filter_map(|t| t.pnl).sum(),
        win_rate: if trades.is_empty() { 0.0 } else { wins as f64 / trades.len() as f64 },
        trade_count: trades.len(),
    }
}

// ==================== Helper/Private methods ====================

fn extract_equity_points(series: Option<&Value>, report: &mut NormalizationReport) -> Vec<EquityPoint> {
    let samples = equity_samples(series);

    let mut dated: Vec<(NaiveDateTime, EquityPoint)> = Vec::with_capacity(samples.len());
    for (date, equity) in samples {
        let Some(equity) = equity.as_ref().and_then(coerce_number) else {
            report.unparseable_equity += 1;
            continue;
        };
        let Some((at, label)) = date.as_ref().and_then(extract::parse_date) else {
            report.unparseable_dates += 1;
            continue;
        };
        dated.push((at, EquityPoint { date: label, equity }));
    }

    // Stable sort, then keep the last sample received for any repeated date
    dated.sort_by_key(|(at, _)| *at);
    let mut points: Vec<(NaiveDateTime, EquityPoint)> = Vec::with_capacity(dated.len());
    for (at, point) in dated {
        match points.last_mut() {
            Some(last) if last.0 == at => {
                *last = (at, point);
                report.duplicate_dates += 1;
            }
            _ => points.push((at, point)),
        }
    }

    points.into_iter().map(|(_, point)| point).collect()
}

/// Flatten the supported series layouts into raw (date, equity) candidates:
/// a list of records or pairs, a column map (`{"date": [...], "equity": [...]}`),
/// or a date-keyed map (`{"2024-01-01": 100.0}`).
fn equity_samples(series: Option<&Value>) -> Vec<(Option<Value>, Option<Value>)> {
    match series {
        Some(Value::Array(items)) => items
            .iter()
            .map(|sample| {
                (
                    first_match(sample, EQUITY_DATE_FIELDS).cloned(),
                    first_match(sample, EQUITY_VALUE_FIELDS).cloned(),
                )
            })
            .collect(),
        Some(Value::Object(columns)) => {
            let dates = extract::first_match_in(columns, EQUITY_DATE_FIELDS).and_then(Value::as_array);
            let values = extract::first_match_in(columns, EQUITY_VALUE_FIELDS).and_then(Value::as_array);
            match (dates, values) {
                (Some(dates), Some(values)) => {
                    let len = dates.len().max(values.len());
                    (0..len)
                        .map(|i| (dates.get(i).cloned(), values.get(i).cloned()))
                        .collect()
                }
                _ => columns
                    .iter()
                    .map(|(date, equity)| (Some(Value::String(date.clone())), Some(equity.clone())))
                    .collect(),
            }
        }
        Some(other) => {
            warn!(series = ?other, "Equity series is neither a list nor a map, ignoring");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn check_reported_summary(reported: &Map<String, Value>, derived: &DerivedSummary) -> Vec<SummaryMismatch> {
    let mut mismatches = Vec::new();

    if let Some(reported_rate) = extract::first_match_in(reported, REPORTED_WIN_RATE_FIELDS).and_then(coerce_number) {
        // Backends report either a fraction or a percentage
        let as_fraction = if reported_rate > 1.0 { reported_rate / 100.0 } else { reported_rate };
        if (as_fraction - derived.win_rate).abs() > WIN_RATE_TOLERANCE {
            mismatches.push(SummaryMismatch::WinRate {
                reported: reported_rate,
                derived: derived.win_rate,
            });
        }
    }

    if let Some(reported_count) = extract::first_match_in(reported, REPORTED_TRADE_COUNT_FIELDS).and_then(coerce_number) {
        if reported_count >= 0.0 && reported_count.fract() == 0.0 && reported_count as usize != derived.trade_count {
            mismatches.push(SummaryMismatch::TradeCount {
                reported: reported_count as u64,
                derived: derived.trade_count,
            });
        }
    }

    mismatches
}
