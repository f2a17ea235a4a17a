//! Numeric feature matrix
//!
//! Encodes each wallet's feature vector as a row of f64s, compresses
//! heavy-tailed columns with `ln(1 + x)`, and standardizes every column to
//! zero mean and unit population variance. Columns without variance carry no
//! information for either scorer and are dropped with a warning.

use serde::Serialize;
use tracing::{debug, warn};

use crate::features::WalletFeatures;

/// Columns with a standard deviation below this are treated as constant
const MIN_STD_DEV: f64 = 1e-12;

type Encoder = fn(&WalletFeatures) -> f64;

fn log1p_count(n: usize) -> f64 {
    (n as f64).ln_1p()
}

/// Sign-preserving log compression for values that can be negative
fn signed_log1p(x: f64) -> f64 {
    x.signum() * x.abs().ln_1p()
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Column name and encoder, in matrix order
const COLUMNS: &[(&str, Encoder)] = &[
    ("trade_count", |f| log1p_count(f.trade_count)),
    ("market_count", |f| log1p_count(f.market_count)),
    ("earnings_trade_count", |f| log1p_count(f.earnings_trade_count)),
    ("earnings_market_count", |f| log1p_count(f.earnings_market_count)),
    ("earnings_focus_ratio", |f| f.earnings_focus_ratio),
    ("earnings_issuers", |f| log1p_count(f.earnings_issuers)),
    ("concentration", |f| f.concentration),
    ("buy_sell_asymmetry", |f| f.buy_sell_asymmetry),
    ("taker_ratio", |f| f.taker_ratio),
    ("total_volume", |f| f.total_volume.max(0.0).ln_1p()),
    ("avg_trade_size", |f| f.avg_trade_size.max(0.0).ln_1p()),
    ("realized_pnl", |f| signed_log1p(f.realized_pnl)),
    ("winning_markets", |f| log1p_count(f.winning_markets)),
    ("losing_markets", |f| log1p_count(f.losing_markets)),
    ("win_rate", |f| f.win_rate),
    ("earnings_wins", |f| log1p_count(f.earnings_wins)),
    ("active_window_days", |f| (f.active_window_secs.max(0) as f64 / 86_400.0).ln_1p()),
    ("zero_window", |f| flag(f.zero_window)),
    ("trades_per_day", |f| f.trades_per_day.max(0.0).ln_1p()),
    ("activity", |f| f.activity.ordinal()),
    ("traded_crypto", |f| flag(f.traded_crypto)),
];

/// What happened while building the matrix
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixReport {
    pub encoded_columns: usize,
    pub dropped_columns: Vec<String>,
}

/// Standardized wallet × feature matrix
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    /// Row labels, same order as the input feature vectors
    pub wallets: Vec<String>,
    /// Names of the retained columns
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Encode and standardize a feature table
    pub fn from_features(features: &[WalletFeatures]) -> (Self, MatrixReport) {
        let n = features.len();
        let mut report = MatrixReport {
            encoded_columns: COLUMNS.len(),
            ..Default::default()
        };
        if n == 0 {
            return (Self::default(), report);
        }

        let mut kept: Vec<(String, Vec<f64>)> = Vec::with_capacity(COLUMNS.len());
        for (name, encode) in COLUMNS {
            let mut values: Vec<f64> = features.iter().map(encode).collect();
            if standardize(&mut values) {
                kept.push((name.to_string(), values));
            } else {
                report.dropped_columns.push(name.to_string());
            }
        }

        if !report.dropped_columns.is_empty() {
            warn!(
                dropped = ?report.dropped_columns,
                "Dropped zero-variance feature columns"
            );
        }

        let rows = (0..n)
            .map(|i| kept.iter().map(|(_, col)| col[i]).collect())
            .collect();
        let matrix = Self {
            wallets: features.iter().map(|f| f.wallet.clone()).collect(),
            columns: kept.into_iter().map(|(name, _)| name).collect(),
            rows,
        };
        debug!(rows = matrix.n_rows(), cols = matrix.n_cols(), "Feature matrix ready");

        (matrix, report)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// True when there is nothing to score: no wallets or no usable columns
    pub fn is_degenerate(&self) -> bool {
        self.n_rows() == 0 || self.n_cols() == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }
}

/// Standardize in place; returns false when the column has no variance
fn standardize(values: &mut [f64]) -> bool {
    if values.is_empty() {
        return false;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if !std_dev.is_finite() || std_dev < MIN_STD_DEV {
        return false;
    }
    for v in values.iter_mut() {
        *v = (*v - mean) / std_dev;
    }
    true
}

/// Euclidean distance between two rows
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
