//! Feature Builder
//!
//! Aggregates validated trades into exactly one [`WalletFeatures`] vector per
//! wallet. Each wallet's trades are put in a canonical order before any
//! floating-point accumulation, so the output is bitwise identical no matter
//! how the input rows were ordered.

pub mod pnl;
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

use crate::classify::TitleClassifier;
use crate::types::{Market, Role, Side, Trade};

pub use validate::{validate_trade, validate_trades, SkipReason, SkipReport};

/// Topic tag that marks crypto price markets
pub const CRYPTO_TOPIC: &str = "crypto";

const SECS_PER_DAY: f64 = 86_400.0;

/// Feature builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Wallets active for no longer than this are a burst, not sustained
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: i64,
}

fn default_burst_window_secs() -> i64 {
    86_400 // one day
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            burst_window_secs: default_burst_window_secs(),
        }
    }
}

/// Shape of a wallet's activity over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPattern {
    /// Every trade at one instant (zero active window)
    SingleEvent,
    /// Active window within the burst window
    Burst,
    Sustained,
}

impl ActivityPattern {
    /// Ordinal encoding used by the feature matrix
    pub fn ordinal(&self) -> f64 {
        match self {
            ActivityPattern::SingleEvent => 0.0,
            ActivityPattern::Burst => 1.0,
            ActivityPattern::Sustained => 2.0,
        }
    }
}

impl fmt::Display for ActivityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityPattern::SingleEvent => write!(f, "single_event"),
            ActivityPattern::Burst => write!(f, "burst"),
            ActivityPattern::Sustained => write!(f, "sustained"),
        }
    }
}

impl std::str::FromStr for ActivityPattern {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "single_event" => Ok(ActivityPattern::SingleEvent),
            "burst" => Ok(ActivityPattern::Burst),
            "sustained" => Ok(ActivityPattern::Sustained),
            _ => Err(()),
        }
    }
}

/// Classifier tags collected over a wallet's markets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTags {
    pub earnings_tickers: BTreeSet<String>,
    pub topics: BTreeSet<String>,
    pub matched_patterns: BTreeSet<String>,
}

/// One row per wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletFeatures {
    pub wallet: String,

    // Breadth
    pub trade_count: usize,
    pub market_count: usize,
    pub earnings_trade_count: usize,
    pub earnings_market_count: usize,
    /// Earnings trades / all trades, in [0, 1]
    pub earnings_focus_ratio: f64,
    /// Distinct earnings tickers traded
    pub earnings_issuers: usize,

    // Flow
    /// Herfindahl index of per-market volume shares, in [1/N, 1]
    pub concentration: f64,
    /// (buy volume - sell volume) / total volume, in [-1, 1]
    pub buy_sell_asymmetry: f64,
    /// Taker fills / fills with a known role
    pub taker_ratio: f64,
    pub total_volume: f64,
    pub avg_trade_size: f64,

    // Outcomes
    pub realized_pnl: f64,
    pub winning_markets: usize,
    pub losing_markets: usize,
    /// Winning / (winning + losing) markets
    pub win_rate: f64,
    pub earnings_wins: usize,

    // Timing
    pub first_trade: DateTime<Utc>,
    pub last_trade: DateTime<Utc>,
    pub active_window_secs: i64,
    pub zero_window: bool,
    /// 0 for zero-window wallets
    pub trades_per_day: f64,
    pub activity: ActivityPattern,

    pub traded_crypto: bool,
    pub tags: WalletTags,
}

/// Output of the Feature Builder
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    /// Sorted by wallet id
    pub wallets: Vec<WalletFeatures>,
    pub markets: BTreeMap<String, Market>,
}

impl FeatureSet {
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }
}

/// Total order over trades used before aggregation
fn canonical_order(a: &Trade, b: &Trade) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.market.cmp(&b.market))
        .then_with(|| a.outcome.cmp(&b.outcome))
        .then_with(|| a.side.cmp(&b.side))
        .then_with(|| a.size.total_cmp(&b.size))
        .then_with(|| a.price.total_cmp(&b.price))
        .then_with(|| a.role.cmp(&b.role))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| match (a.pnl, b.pnl) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        })
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Builds wallet feature vectors from validated trades
pub struct FeatureBuilder<'a> {
    classifier: &'a TitleClassifier,
    config: FeatureConfig,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(classifier: &'a TitleClassifier, config: FeatureConfig) -> Self {
        Self { classifier, config }
    }

    /// Classify every distinct market once
    ///
    /// A market seen under several titles is classified by the
    /// lexicographically smallest one.
    pub fn markets(&self, trades: &[Trade]) -> BTreeMap<String, Market> {
        let mut titles: BTreeMap<&str, &str> = BTreeMap::new();
        for trade in trades {
            titles
                .entry(trade.market.as_str())
                .and_modify(|t| {
                    if trade.title.as_str() < *t {
                        *t = trade.title.as_str();
                    }
                })
                .or_insert(trade.title.as_str());
        }

        titles
            .into_iter()
            .map(|(key, title)| {
                let market = Market {
                    key: key.to_string(),
                    title: title.to_string(),
                    classification: self.classifier.classify(title),
                };
                (key.to_string(), market)
            })
            .collect()
    }

    /// Aggregate trades into one feature vector per wallet
    pub fn build(&self, trades: &[Trade]) -> FeatureSet {
        let markets = self.markets(trades);

        let mut by_wallet: BTreeMap<&str, Vec<&Trade>> = BTreeMap::new();
        for trade in trades {
            by_wallet.entry(trade.wallet.as_str()).or_default().push(trade);
        }

        let wallets: Vec<WalletFeatures> = by_wallet
            .into_iter()
            .filter_map(|(wallet, mut wallet_trades)| {
                wallet_trades.sort_by(|a, b| canonical_order(a, b));
                self.aggregate(wallet, &wallet_trades, &markets)
            })
            .collect();

        let earnings_markets = markets.values().filter(|m| m.is_earnings()).count();
        info!(
            trades = trades.len(),
            wallets = wallets.len(),
            markets = markets.len(),
            earnings_markets,
            "Built wallet features"
        );

        FeatureSet { wallets, markets }
    }

    fn aggregate(
        &self,
        wallet: &str,
        trades: &[&Trade],
        markets: &BTreeMap<String, Market>,
    ) -> Option<WalletFeatures> {
        let first = trades.first()?.timestamp;
        let last = trades.last()?.timestamp;
        let trade_count = trades.len();

        let pnl_per_trade = pnl::realized_pnl(trades);

        let mut market_volume: BTreeMap<&str, f64> = BTreeMap::new();
        let mut market_trades: BTreeMap<&str, usize> = BTreeMap::new();
        let mut market_pnl: BTreeMap<&str, f64> = BTreeMap::new();
        let mut tags = WalletTags::default();

        let mut earnings_trade_count = 0usize;
        let mut buy_volume = 0.0;
        let mut sell_volume = 0.0;
        let mut taker_fills = 0usize;
        let mut known_role_fills = 0usize;

        for (trade, pnl) in trades.iter().zip(&pnl_per_trade) {
            let notional = trade.notional();
            *market_volume.entry(trade.market.as_str()).or_insert(0.0) += notional;
            *market_trades.entry(trade.market.as_str()).or_insert(0) += 1;
            *market_pnl.entry(trade.market.as_str()).or_insert(0.0) += pnl;

            match trade.side {
                Side::Buy => buy_volume += notional,
                Side::Sell => sell_volume += notional,
            }
            if let Some(role) = trade.role {
                known_role_fills += 1;
                if role == Role::Taker {
                    taker_fills += 1;
                }
            }

            let Some(market) = markets.get(&trade.market) else {
                continue;
            };
            let class = &market.classification;
            if class.is_earnings_market {
                earnings_trade_count += 1;
                if let Some(ticker) = &class.ticker_tag {
                    tags.earnings_tickers.insert(ticker.clone());
                }
            }
            if let Some(topic) = &class.topic {
                tags.topics.insert(topic.clone());
            }
            if let Some(pattern) = &class.matched_pattern {
                tags.matched_patterns.insert(pattern.clone());
            }
        }

        let is_earnings =
            |key: &str| markets.get(key).map(|m| m.is_earnings()).unwrap_or(false);

        let total_volume: f64 = market_volume.values().sum();
        let concentration = if total_volume > 0.0 {
            market_volume
                .values()
                .map(|v| (v / total_volume).powi(2))
                .sum()
        } else {
            // Zero-priced fills only: fall back to trade-count shares
            let n = trade_count as f64;
            market_trades.values().map(|&c| (c as f64 / n).powi(2)).sum()
        };

        let realized_pnl: f64 = market_pnl.values().sum();
        let winning: Vec<&str> = market_pnl
            .iter()
            .filter(|(_, p)| **p > 0.0)
            .map(|(k, _)| *k)
            .collect();
        let losing_markets = market_pnl.values().filter(|&&p| p < 0.0).count();
        let winning_markets = winning.len();
        let earnings_wins = winning.iter().filter(|k| is_earnings(**k)).count();

        let active_window_secs = (last - first).num_seconds();
        let zero_window = active_window_secs == 0;
        let activity = if zero_window {
            ActivityPattern::SingleEvent
        } else if active_window_secs <= self.config.burst_window_secs {
            ActivityPattern::Burst
        } else {
            ActivityPattern::Sustained
        };
        let trades_per_day = if zero_window {
            0.0
        } else {
            trade_count as f64 / (active_window_secs as f64 / SECS_PER_DAY).max(1.0)
        };

        let earnings_market_count = market_trades.keys().filter(|k| is_earnings(**k)).count();
        let traded_crypto = tags.topics.contains(CRYPTO_TOPIC);

        Some(WalletFeatures {
            wallet: wallet.to_string(),
            trade_count,
            market_count: market_trades.len(),
            earnings_trade_count,
            earnings_market_count,
            earnings_focus_ratio: ratio(earnings_trade_count as f64, trade_count as f64),
            earnings_issuers: tags.earnings_tickers.len(),
            concentration,
            buy_sell_asymmetry: ratio(buy_volume - sell_volume, buy_volume + sell_volume),
            taker_ratio: ratio(taker_fills as f64, known_role_fills as f64),
            total_volume,
            avg_trade_size: ratio(total_volume, trade_count as f64),
            realized_pnl,
            winning_markets,
            losing_markets,
            win_rate: ratio(
                winning_markets as f64,
                (winning_markets + losing_markets) as f64,
            ),
            earnings_wins,
            first_trade: first,
            last_trade: last,
            active_window_secs,
            zero_window,
            trades_per_day,
            activity,
            traded_crypto,
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::types::parse_timestamp;

    const EARNINGS_TITLE: &str = "Will Oklo (OKLO) beat quarterly earnings?";

    fn trade(wallet: &str, market: &str, title: &str, side: Side, size: f64, price: f64) -> Trade {
        Trade {
            wallet: wallet.into(),
            market: market.into(),
            title: title.into(),
            outcome: Some("Yes".into()),
            timestamp: parse_timestamp("2024-11-11T12:00:00Z").unwrap(),
            side,
            role: Some(Role::Taker),
            size,
            price,
            pnl: None,
        }
    }

    fn build(trades: &[Trade]) -> FeatureSet {
        let classifier = TitleClassifier::with_default_rules().unwrap();
        FeatureBuilder::new(&classifier, FeatureConfig::default()).build(trades)
    }

    #[test]
    fn test_one_trade_wallet() {
        let set = build(&[trade("w1", "m1", EARNINGS_TITLE, Side::Buy, 10.0, 0.5)]);
        assert_eq!(set.len(), 1);

        let f = &set.wallets[0];
        assert_eq!(f.active_window_secs, 0);
        assert!(f.zero_window);
        assert_eq!(f.activity, ActivityPattern::SingleEvent);
        assert_eq!(f.trades_per_day, 0.0);
        assert!((f.concentration - 1.0).abs() < 1e-12);
        assert_eq!(f.earnings_focus_ratio, 1.0);
        assert_eq!(f.tags.earnings_tickers.iter().next().map(String::as_str), Some("OKLO"));

        let set = build(&[trade("w2", "m2", "Will it rain?", Side::Buy, 10.0, 0.5)]);
        assert_eq!(set.wallets[0].earnings_focus_ratio, 0.0);
        assert!((set.wallets[0].concentration - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominators() {
        let mut t = trade("w1", "m1", "Will it rain?", Side::Buy, 10.0, 0.0);
        t.role = None;
        let f = &build(&[t]).wallets[0];
        assert_eq!(f.total_volume, 0.0);
        assert_eq!(f.buy_sell_asymmetry, 0.0);
        assert_eq!(f.taker_ratio, 0.0);
        assert_eq!(f.avg_trade_size, 0.0);
        assert_eq!(f.win_rate, 0.0);
        assert!((f.concentration - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_concentration_bounds() {
        let trades = vec![
            trade("w", "a", "Will A?", Side::Buy, 10.0, 0.5),
            trade("w", "b", "Will B?", Side::Buy, 10.0, 0.5),
            trade("w", "c", "Will C?", Side::Buy, 10.0, 0.5),
            trade("w", "d", "Will D?", Side::Buy, 10.0, 0.5),
        ];
        let f = &build(&trades).wallets[0];
        assert_eq!(f.market_count, 4);
        assert!((f.concentration - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_earnings_focus_monotonic() {
        let mut previous = -1.0;
        for earnings in 0..=6 {
            let trades: Vec<Trade> = (0..6)
                .map(|i| {
                    let (market, title) = if i < earnings {
                        ("e", EARNINGS_TITLE)
                    } else {
                        ("x", "Will it rain?")
                    };
                    trade("w", market, title, Side::Buy, 1.0, 0.5)
                })
                .collect();
            let ratio = build(&trades).wallets[0].earnings_focus_ratio;
            assert!((0.0..=1.0).contains(&ratio));
            assert!(ratio >= previous);
            previous = ratio;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_order_independent() {
        let base = parse_timestamp("2024-11-01").unwrap();
        let mut trades = Vec::new();
        for i in 0..12 {
            let mut t = trade(
                if i % 3 == 0 { "w1" } else { "w2" },
                if i % 2 == 0 { "e" } else { "x" },
                if i % 2 == 0 { EARNINGS_TITLE } else { "Will it rain?" },
                if i % 4 == 3 { Side::Sell } else { Side::Buy },
                1.0 + i as f64 * 0.37,
                0.1 + (i as f64 * 0.07) % 0.8,
            );
            t.timestamp = base + Duration::hours((i * 7 % 5) as i64);
            trades.push(t);
        }

        let forward = build(&trades);
        trades.reverse();
        let reversed = build(&trades);
        assert_eq!(forward.wallets, reversed.wallets);
    }

    #[test]
    fn test_pnl_and_win_rate() {
        let base = parse_timestamp("2024-11-01").unwrap();
        let mut buy = trade("w", "e", EARNINGS_TITLE, Side::Buy, 100.0, 0.4);
        let mut sell = trade("w", "e", EARNINGS_TITLE, Side::Sell, 100.0, 0.9);
        let mut loser_buy = trade("w", "x", "Will it rain?", Side::Buy, 10.0, 0.5);
        let mut loser_sell = trade("w", "x", "Will it rain?", Side::Sell, 10.0, 0.2);
        buy.timestamp = base;
        sell.timestamp = base + Duration::days(3);
        loser_buy.timestamp = base + Duration::days(1);
        loser_sell.timestamp = base + Duration::days(2);

        let f = &build(&[sell, loser_sell, buy, loser_buy]).wallets[0];
        assert!((f.realized_pnl - 47.0).abs() < 1e-9);
        assert_eq!(f.winning_markets, 1);
        assert_eq!(f.losing_markets, 1);
        assert!((f.win_rate - 0.5).abs() < 1e-12);
        assert_eq!(f.earnings_wins, 1);
        assert_eq!(f.active_window_secs, 3 * 86_400);
        assert_eq!(f.activity, ActivityPattern::Sustained);
        assert!((f.trades_per_day - 4.0 / 3.0).abs() < 1e-12);
        assert!(f.buy_sell_asymmetry < 0.0);
    }

    #[test]
    fn test_crypto_flag_and_tags() {
        let f = &build(&[trade("w", "b", "Bitcoin above $100k on Friday?", Side::Buy, 5.0, 0.3)])
            .wallets[0];
        assert!(f.traded_crypto);
        assert!(f.tags.topics.contains(CRYPTO_TOPIC));
        assert_eq!(f.earnings_trade_count, 0);
    }

    #[test]
    fn test_empty_input() {
        let set = build(&[]);
        assert!(set.is_empty());
        assert!(set.markets.is_empty());
    }
}
