//! Row validation
//!
//! Malformed rows are excluded from aggregation and counted by reason.
//! Nothing in here is fatal.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::types::{parse_timestamp, RawTrade, Role, Side, Trade};

/// Why a trade row was excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingWallet,
    MissingMarket,
    InvalidTimestamp,
    InvalidSide,
    InvalidRole,
    /// Non-numeric size, price or PnL
    InvalidNumber,
    /// Numeric but impossible: non-positive size, price outside [0, 1]
    OutOfRange,
    /// Row the CSV reader could not decode
    Unreadable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::MissingWallet => "missing wallet",
            SkipReason::MissingMarket => "missing market",
            SkipReason::InvalidTimestamp => "invalid timestamp",
            SkipReason::InvalidSide => "invalid side",
            SkipReason::InvalidRole => "invalid role",
            SkipReason::InvalidNumber => "non-numeric field",
            SkipReason::OutOfRange => "value out of range",
            SkipReason::Unreadable => "unreadable row",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate of excluded rows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkipReport {
    pub total_rows: usize,
    pub accepted: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl SkipReport {
    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn count(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn record(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    /// Count rows the reader dropped before validation
    pub fn add_unreadable(&mut self, count: usize) {
        if count > 0 {
            self.total_rows += count;
            *self.skipped.entry(SkipReason::Unreadable).or_insert(0) += count;
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number(field: &Option<String>) -> Result<f64, SkipReason> {
    let text = non_empty(field).ok_or(SkipReason::InvalidNumber)?;
    let value: f64 = text.parse().map_err(|_| SkipReason::InvalidNumber)?;
    if !value.is_finite() {
        return Err(SkipReason::InvalidNumber);
    }
    Ok(value)
}

/// Validate one raw row
pub fn validate_trade(raw: &RawTrade) -> Result<Trade, SkipReason> {
    let wallet = non_empty(&raw.wallet).ok_or(SkipReason::MissingWallet)?;

    let market_id = non_empty(&raw.market_id);
    let title = non_empty(&raw.title);
    let (market, title) = match (market_id, title) {
        (Some(id), Some(t)) => (id, t),
        (Some(id), None) => (id, id),
        (None, Some(t)) => (t, t),
        (None, None) => return Err(SkipReason::MissingMarket),
    };

    let timestamp = non_empty(&raw.timestamp)
        .and_then(parse_timestamp)
        .ok_or(SkipReason::InvalidTimestamp)?;

    let side: Side = non_empty(&raw.side)
        .ok_or(SkipReason::InvalidSide)?
        .parse()
        .map_err(|_| SkipReason::InvalidSide)?;

    let role = match non_empty(&raw.role) {
        Some(text) => Some(text.parse::<Role>().map_err(|_| SkipReason::InvalidRole)?),
        None => None,
    };

    let size = parse_number(&raw.size)?;
    let price = parse_number(&raw.price)?;
    if size <= 0.0 || !(0.0..=1.0).contains(&price) {
        return Err(SkipReason::OutOfRange);
    }

    let pnl = match non_empty(&raw.pnl) {
        Some(_) => Some(parse_number(&raw.pnl)?),
        None => None,
    };

    Ok(Trade {
        wallet: wallet.to_string(),
        market: market.to_string(),
        title: title.to_string(),
        outcome: non_empty(&raw.outcome).map(str::to_string),
        timestamp,
        side,
        role,
        size,
        price,
        pnl,
    })
}

/// Validate every row, keeping the good ones and counting the rest
pub fn validate_trades(rows: &[RawTrade]) -> (Vec<Trade>, SkipReport) {
    let mut report = SkipReport {
        total_rows: rows.len(),
        ..Default::default()
    };
    let mut trades = Vec::with_capacity(rows.len());

    for (idx, raw) in rows.iter().enumerate() {
        match validate_trade(raw) {
            Ok(trade) => trades.push(trade),
            Err(reason) => {
                debug!(row = idx, %reason, "Skipping malformed trade row");
                report.record(reason);
            }
        }
    }
    report.accepted = trades.len();

    if report.total_skipped() > 0 {
        warn!(
            skipped = report.total_skipped(),
            total = report.total_rows,
            by_reason = ?report.skipped,
            "Excluded malformed trade rows"
        );
    }

    (trades, report)
}
