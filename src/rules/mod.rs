//! Rule Post-Filter
//!
//! Hand-written behavioral rules re-rank scorer output. Every rule is a pure
//! function of a wallet's features and classifier tags that yields a
//! non-negative boost and a label. Boosts only ever add to the base score,
//! and nothing here removes a wallet: narrowing the export list is the
//! ranker's job.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::{WalletFeatures, WalletTags};

/// A rule that fired for one wallet
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub label: &'static str,
    /// Always >= 0
    pub boost: f64,
}

/// Behavioral rule over one wallet
pub trait BehaviorRule {
    /// Label attached to matching wallets
    fn label(&self) -> &'static str;

    /// Boost for this wallet, or None when the rule does not apply
    fn evaluate(&self, features: &WalletFeatures, tags: &WalletTags) -> Option<f64>;
}

fn check_boost(name: &'static str, boost: f64) -> Result<()> {
    if boost.is_finite() && boost >= 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(name, format!("boost must be >= 0, got {}", boost)))
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid(name, format!("must be in [0, 1], got {}", value)))
    }
}

fn default_true() -> bool {
    true
}

/// Several profitable markets that are earnings markets, with volume
/// concentrated on few of them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentratedEarningsWins {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_earnings_wins")]
    pub min_earnings_wins: usize,
    #[serde(default = "default_min_concentration")]
    pub min_concentration: f64,
    #[serde(default = "default_concentrated_boost")]
    pub boost: f64,
}

fn default_min_earnings_wins() -> usize {
    2
}

fn default_min_concentration() -> f64 {
    0.5
}

fn default_concentrated_boost() -> f64 {
    0.25
}

impl Default for ConcentratedEarningsWins {
    fn default() -> Self {
        Self {
            enabled: true,
            min_earnings_wins: default_min_earnings_wins(),
            min_concentration: default_min_concentration(),
            boost: default_concentrated_boost(),
        }
    }
}

impl BehaviorRule for ConcentratedEarningsWins {
    fn label(&self) -> &'static str {
        "concentrated-earnings-wins"
    }

    fn evaluate(&self, f: &WalletFeatures, _tags: &WalletTags) -> Option<f64> {
        (f.earnings_wins >= self.min_earnings_wins && f.concentration >= self.min_concentration)
            .then_some(self.boost)
    }
}

/// Most of the wallet's trades are on earnings markets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsFocused {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_focus_ratio")]
    pub min_focus_ratio: f64,
    #[serde(default = "default_min_earnings_trades")]
    pub min_earnings_trades: usize,
    #[serde(default = "default_focused_boost")]
    pub boost: f64,
}

fn default_min_focus_ratio() -> f64 {
    0.8
}

fn default_min_earnings_trades() -> usize {
    3
}

fn default_focused_boost() -> f64 {
    0.1
}

impl Default for EarningsFocused {
    fn default() -> Self {
        Self {
            enabled: true,
            min_focus_ratio: default_min_focus_ratio(),
            min_earnings_trades: default_min_earnings_trades(),
            boost: default_focused_boost(),
        }
    }
}

impl BehaviorRule for EarningsFocused {
    fn label(&self) -> &'static str {
        "earnings-focused"
    }

    fn evaluate(&self, f: &WalletFeatures, _tags: &WalletTags) -> Option<f64> {
        (f.earnings_focus_ratio >= self.min_focus_ratio
            && f.earnings_trade_count >= self.min_earnings_trades)
            .then_some(self.boost)
    }
}

/// Wins on nearly every closed market. The boost scales with the win rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighWinRate {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_win_rate")]
    pub min_win_rate: f64,
    #[serde(default = "default_min_closed_markets")]
    pub min_closed_markets: usize,
    #[serde(default = "default_win_rate_boost")]
    pub boost: f64,
}

fn default_min_win_rate() -> f64 {
    0.8
}

fn default_min_closed_markets() -> usize {
    3
}

fn default_win_rate_boost() -> f64 {
    0.15
}

impl Default for HighWinRate {
    fn default() -> Self {
        Self {
            enabled: true,
            min_win_rate: default_min_win_rate(),
            min_closed_markets: default_min_closed_markets(),
            boost: default_win_rate_boost(),
        }
    }
}

impl BehaviorRule for HighWinRate {
    fn label(&self) -> &'static str {
        "high-win-rate"
    }

    fn evaluate(&self, f: &WalletFeatures, _tags: &WalletTags) -> Option<f64> {
        let closed = f.winning_markets + f.losing_markets;
        (closed >= self.min_closed_markets && f.win_rate >= self.min_win_rate)
            .then(|| self.boost * f.win_rate)
    }
}

/// Buys only (or sells only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneSidedFlow {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_asymmetry")]
    pub min_asymmetry: f64,
    #[serde(default = "default_min_trades")]
    pub min_trades: usize,
    #[serde(default = "default_one_sided_boost")]
    pub boost: f64,
}

fn default_min_asymmetry() -> f64 {
    0.9
}

fn default_min_trades() -> usize {
    3
}

fn default_one_sided_boost() -> f64 {
    0.05
}

impl Default for OneSidedFlow {
    fn default() -> Self {
        Self {
            enabled: true,
            min_asymmetry: default_min_asymmetry(),
            min_trades: default_min_trades(),
            boost: default_one_sided_boost(),
        }
    }
}

impl BehaviorRule for OneSidedFlow {
    fn label(&self) -> &'static str {
        "one-sided-flow"
    }

    fn evaluate(&self, f: &WalletFeatures, _tags: &WalletTags) -> Option<f64> {
        (f.trade_count >= self.min_trades && f.buy_sell_asymmetry.abs() >= self.min_asymmetry)
            .then_some(self.boost)
    }
}

/// Earnings markets on several issuers (tag only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiIssuerEarnings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_issuers")]
    pub min_issuers: usize,
}

fn default_min_issuers() -> usize {
    2
}

impl Default for MultiIssuerEarnings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_issuers: default_min_issuers(),
        }
    }
}

impl BehaviorRule for MultiIssuerEarnings {
    fn label(&self) -> &'static str {
        "multi-issuer-earnings"
    }

    fn evaluate(&self, _f: &WalletFeatures, tags: &WalletTags) -> Option<f64> {
        (tags.earnings_tickers.len() >= self.min_issuers).then_some(0.0)
    }
}

/// Traded at least one crypto price market (tag only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoPriceTrader {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CryptoPriceTrader {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl BehaviorRule for CryptoPriceTrader {
    fn label(&self) -> &'static str {
        "crypto-price-trader"
    }

    fn evaluate(&self, f: &WalletFeatures, _tags: &WalletTags) -> Option<f64> {
        f.traded_crypto.then_some(0.0)
    }
}

/// Rule set configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub concentrated_earnings_wins: ConcentratedEarningsWins,
    #[serde(default)]
    pub earnings_focused: EarningsFocused,
    #[serde(default)]
    pub high_win_rate: HighWinRate,
    #[serde(default)]
    pub one_sided_flow: OneSidedFlow,
    #[serde(default)]
    pub multi_issuer_earnings: MultiIssuerEarnings,
    #[serde(default)]
    pub crypto_price_trader: CryptoPriceTrader,
}

impl RulesConfig {
    pub fn validate(&self) -> Result<()> {
        check_boost(
            "rules.concentrated_earnings_wins.boost",
            self.concentrated_earnings_wins.boost,
        )?;
        check_unit(
            "rules.concentrated_earnings_wins.min_concentration",
            self.concentrated_earnings_wins.min_concentration,
        )?;
        check_boost("rules.earnings_focused.boost", self.earnings_focused.boost)?;
        check_unit(
            "rules.earnings_focused.min_focus_ratio",
            self.earnings_focused.min_focus_ratio,
        )?;
        check_boost("rules.high_win_rate.boost", self.high_win_rate.boost)?;
        check_unit("rules.high_win_rate.min_win_rate", self.high_win_rate.min_win_rate)?;
        check_boost("rules.one_sided_flow.boost", self.one_sided_flow.boost)?;
        check_unit("rules.one_sided_flow.min_asymmetry", self.one_sided_flow.min_asymmetry)?;
        Ok(())
    }
}

/// Outcome of the post-filter for one wallet
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    /// Base score plus every boost
    pub final_score: f64,
    /// Labels of matching rules, in rule order
    pub labels: Vec<String>,
}

/// Ordered set of enabled rules
pub struct RuleEngine {
    rules: Vec<Box<dyn BehaviorRule>>,
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.label()))
            .finish()
    }
}

impl RuleEngine {
    pub fn new(rules: Vec<Box<dyn BehaviorRule>>) -> Self {
        Self { rules }
    }

    /// Build the enabled rules from configuration
    pub fn from_config(config: &RulesConfig) -> Result<Self> {
        config.validate()?;

        let mut rules: Vec<Box<dyn BehaviorRule>> = Vec::new();
        if config.concentrated_earnings_wins.enabled {
            rules.push(Box::new(config.concentrated_earnings_wins.clone()));
        }
        if config.earnings_focused.enabled {
            rules.push(Box::new(config.earnings_focused.clone()));
        }
        if config.high_win_rate.enabled {
            rules.push(Box::new(config.high_win_rate.clone()));
        }
        if config.one_sided_flow.enabled {
            rules.push(Box::new(config.one_sided_flow.clone()));
        }
        if config.multi_issuer_earnings.enabled {
            rules.push(Box::new(config.multi_issuer_earnings.clone()));
        }
        if config.crypto_price_trader.enabled {
            rules.push(Box::new(config.crypto_price_trader.clone()));
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule that fires for this wallet
    pub fn hits(&self, features: &WalletFeatures) -> Vec<RuleHit> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.evaluate(features, &features.tags).map(|boost| RuleHit {
                    label: rule.label(),
                    // Boosts never subtract
                    boost: if boost.is_finite() { boost.max(0.0) } else { 0.0 },
                })
            })
            .collect()
    }

    /// Apply all rules on top of a base score
    pub fn apply(&self, features: &WalletFeatures, base_score: f64) -> RuleOutcome {
        let hits = self.hits(features);
        let boost: f64 = hits.iter().map(|h| h.boost).sum();
        if !hits.is_empty() {
            debug!(wallet = %features.wallet, boost, rules = hits.len(), "Rules matched");
        }
        RuleOutcome {
            final_score: base_score + boost,
            labels: hits.iter().map(|h| h.label.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ActivityPattern;
    use crate::types::parse_timestamp;

    fn features() -> WalletFeatures {
        let ts = parse_timestamp("2024-11-11").unwrap();
        WalletFeatures {
            wallet: "0xabc".into(),
            trade_count: 1,
            market_count: 1,
            earnings_trade_count: 0,
            earnings_market_count: 0,
            earnings_focus_ratio: 0.0,
            earnings_issuers: 0,
            concentration: 1.0,
            buy_sell_asymmetry: 1.0,
            taker_ratio: 1.0,
            total_volume: 10.0,
            avg_trade_size: 10.0,
            realized_pnl: 0.0,
            winning_markets: 0,
            losing_markets: 0,
            win_rate: 0.0,
            earnings_wins: 0,
            first_trade: ts,
            last_trade: ts,
            active_window_secs: 0,
            zero_window: true,
            trades_per_day: 0.0,
            activity: ActivityPattern::SingleEvent,
            traded_crypto: false,
            tags: WalletTags::default(),
        }
    }

    fn insider() -> WalletFeatures {
        let mut f = features();
        f.trade_count = 6;
        f.market_count = 2;
        f.earnings_trade_count = 6;
        f.earnings_market_count = 2;
        f.earnings_focus_ratio = 1.0;
        f.earnings_issuers = 2;
        f.concentration = 0.6;
        f.winning_markets = 3;
        f.win_rate = 1.0;
        f.earnings_wins = 2;
        f.tags.earnings_tickers = ["OKLO".to_string(), "PLTR".to_string()].into();
        f
    }

    #[test]
    fn test_quiet_wallet_gets_nothing() {
        let engine = RuleEngine::from_config(&RulesConfig::default()).unwrap();
        let outcome = engine.apply(&features(), 0.4);
        assert_eq!(outcome.final_score, 0.4);
        assert!(outcome.labels.is_empty());
    }

    #[test]
    fn test_insider_profile_labels() {
        let engine = RuleEngine::from_config(&RulesConfig::default()).unwrap();
        let outcome = engine.apply(&insider(), 0.5);

        assert_eq!(
            outcome.labels,
            vec![
                "concentrated-earnings-wins",
                "earnings-focused",
                "high-win-rate",
                "one-sided-flow",
                "multi-issuer-earnings",
            ]
        );
        // 0.25 + 0.1 + 0.15 * 1.0 + 0.05
        assert!((outcome.final_score - 1.05).abs() < 1e-12);
    }

    #[test]
    fn test_tag_only_rules_do_not_move_score() {
        let mut f = features();
        f.traded_crypto = true;
        let engine = RuleEngine::from_config(&RulesConfig::default()).unwrap();
        let outcome = engine.apply(&f, 0.3);
        assert_eq!(outcome.labels, vec!["crypto-price-trader"]);
        assert_eq!(outcome.final_score, 0.3);
    }

    #[test]
    fn test_never_below_base() {
        struct Negative;
        impl BehaviorRule for Negative {
            fn label(&self) -> &'static str {
                "negative"
            }
            fn evaluate(&self, _f: &WalletFeatures, _t: &WalletTags) -> Option<f64> {
                Some(-5.0)
            }
        }

        let engine = RuleEngine::new(vec![Box::new(Negative)]);
        for base in [0.0, 0.2, 0.9] {
            assert!(engine.apply(&insider(), base).final_score >= base);
        }
    }

    #[test]
    fn test_disabled_rules_skipped() {
        let mut config = RulesConfig::default();
        config.concentrated_earnings_wins.enabled = false;
        config.multi_issuer_earnings.enabled = false;
        let engine = RuleEngine::from_config(&config).unwrap();
        assert_eq!(engine.len(), 4);

        let labels = engine.apply(&insider(), 0.0).labels;
        assert!(!labels.contains(&"concentrated-earnings-wins".to_string()));
    }

    #[test]
    fn test_negative_boost_rejected() {
        let mut config = RulesConfig::default();
        config.high_win_rate.boost = -0.1;
        assert!(RuleEngine::from_config(&config).unwrap_err().is_config_error());
    }

    #[test]
    fn test_engine_debug_lists_labels() {
        let mut config = RulesConfig::default();
        config.crypto_price_trader.enabled = false;
        let engine = RuleEngine::from_config(&config).unwrap();
        let text = format!("{:?}", engine);
        assert!(text.contains("concentrated-earnings-wins"));
        assert!(!text.contains("crypto-price-trader"));
    }
}
