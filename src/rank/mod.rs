//! Ranker
//!
//! Orders wallets by final score (descending, ties by wallet id ascending),
//! applies the export filter and cuts the list to top-N. Raw scores are
//! carried through untouched; filtering only decides which rows are emitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::{Error, Result};
use crate::features::WalletFeatures;
use crate::scoring::WalletScore;

/// How many ranked rows to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "TopNRepr", into = "TopNRepr")]
pub enum TopN {
    #[default]
    All,
    Count(usize),
}

/// `top_n` as written in config: a number or the word "all"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TopNRepr {
    Count(usize),
    Text(String),
}

impl TryFrom<TopNRepr> for TopN {
    type Error = Error;

    fn try_from(repr: TopNRepr) -> Result<Self> {
        match repr {
            TopNRepr::Count(n) => Ok(TopN::Count(n)),
            TopNRepr::Text(s) => s.parse(),
        }
    }
}

impl From<TopN> for TopNRepr {
    fn from(top_n: TopN) -> Self {
        match top_n {
            TopN::All => TopNRepr::Text("all".to_string()),
            TopN::Count(n) => TopNRepr::Count(n),
        }
    }
}

impl FromStr for TopN {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(TopN::All);
        }
        s.parse::<usize>().map(TopN::Count).map_err(|_| {
            Error::invalid(
                "export.top_n",
                format!("expected a number or \"all\", got `{}`", s),
            )
        })
    }
}

impl fmt::Display for TopN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopN::All => write!(f, "all"),
            TopN::Count(n) => write!(f, "{}", n),
        }
    }
}

impl TopN {
    pub fn validate(&self) -> Result<()> {
        match self {
            TopN::Count(0) => Err(Error::invalid(
                "export.top_n",
                "must be at least 1 or \"all\"",
            )),
            _ => Ok(()),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            TopN::All => None,
            TopN::Count(n) => Some(*n),
        }
    }
}

/// Narrowing filters for the exported list
///
/// A wallet flagged by both strategies is always exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportFilter {
    /// Only wallets with at least one earnings-market trade
    #[serde(default)]
    pub earnings_only: bool,

    #[serde(default)]
    pub min_final_score: Option<f64>,

    /// Keep wallets matching at least one of these rule labels
    #[serde(default)]
    pub require_labels: Vec<String>,
}

impl ExportFilter {
    pub fn keeps(&self, row: &RankedRow) -> bool {
        if row.score.flagged_by_both() {
            return true;
        }
        if self.earnings_only && row.features.earnings_trade_count == 0 {
            return false;
        }
        if let Some(min) = self.min_final_score {
            if row.final_score < min {
                return false;
            }
        }
        if !self.require_labels.is_empty()
            && !row.labels.iter().any(|l| self.require_labels.contains(l))
        {
            return false;
        }
        true
    }
}

/// One wallet in the ranked result
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    /// 1-based position among all scored wallets, before filtering
    pub rank: usize,
    pub features: WalletFeatures,
    pub score: WalletScore,
    pub final_score: f64,
    pub labels: Vec<String>,
}

impl RankedRow {
    pub fn wallet(&self) -> &str {
        &self.features.wallet
    }
}

/// Descending final score, ties by wallet id ascending
pub fn sort_rows(rows: &mut [RankedRow]) {
    rows.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.wallet().cmp(b.wallet()))
    });
}

/// Sort, number, filter and truncate
pub fn rank(mut rows: Vec<RankedRow>, filter: &ExportFilter, top_n: TopN) -> Vec<RankedRow> {
    let scored = rows.len();
    sort_rows(&mut rows);
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }

    let mut kept: Vec<RankedRow> = rows.into_iter().filter(|r| filter.keeps(r)).collect();
    let filtered = kept.len();
    if let Some(limit) = top_n.limit() {
        kept.truncate(limit);
    }

    info!(scored, filtered, exported = kept.len(), top_n = %top_n, "Ranked wallets");
    kept
}
