//! Declarative title rules
//!
//! A rule is plain data: it is deserialized from the `[[classifier.rules]]`
//! tables of the config file and compiled once by the classifier.

use serde::{Deserialize, Serialize};

/// How a rule's patterns are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Regular expression (`regex` crate syntax)
    #[default]
    Regex,
    /// Plain substring
    Literal,
}

/// One title-matching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRule {
    /// Rule name, reported as `matched_pattern`
    pub name: String,

    /// Primary pattern. A named group `ticker` supplies the ticker tag.
    pub pattern: String,

    #[serde(default)]
    pub kind: PatternKind,

    /// Additional patterns that must all match
    #[serde(default)]
    pub requires: Vec<String>,

    /// Patterns that veto the rule when any of them matches
    #[serde(default)]
    pub excludes: Vec<String>,

    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,

    /// Markets matched by this rule are earnings markets
    #[serde(default)]
    pub earnings: bool,

    /// Topic tag attached to matched markets (e.g. "earnings", "crypto")
    #[serde(default)]
    pub tag: Option<String>,
}

fn default_case_insensitive() -> bool {
    true
}

/// "Will {Company} ({TICKER}) beat quarterly earnings?"
const EARNINGS_STRICT: &str =
    r"^\s*will\s+(?P<company>.+?)\s*\((?P<ticker>[A-Z]{1,5})\)\s+beat\s+quarterly\s+earnings\?\s*$";

const EARNINGS_LOOSE: &str =
    r"will\s+.+?\s+\((?P<ticker>[a-z]{1,5})\)\s+beat\s+quarterly\s+earnings";

const COIN: &str = r"\b(bitcoin|btc|ethereum|eth|xrp|solana|sol|doge|dogecoin|ada|cardano|ltc|litecoin|bch|trx|tron|usdt|tether|usdc|bnb|binance|dot|polkadot|avax|avalanche|xmr|monero|ripple)\b";

const PRICE_MOVE: &str = r"\b(up or down|above|below|price|ath|close|open|settle|futures|inflow|outflow|%|reach|hit|cross|break|surge|drop|fall|rise|gain|lose|crash|moon|pump|dump|target|rally|dip|spike|climb|plunge|soar|tank|rocket|bottom|peak|high|low|by\b|\$\d+|\b\d{1,2}(:\d{2})?\s?(am|pm)?\s?(et|utc)\b)";

const SPEECH: &str = r"\b(say|mention|tweet|post|utter|state)\b";

/// Starting rule set: strict and loose earnings titles, then crypto price markets
pub fn default_rules() -> Vec<TitleRule> {
    vec![
        TitleRule {
            name: "earnings-strict".to_string(),
            pattern: EARNINGS_STRICT.to_string(),
            kind: PatternKind::Regex,
            requires: vec![],
            excludes: vec![],
            case_insensitive: true,
            earnings: true,
            tag: Some("earnings".to_string()),
        },
        TitleRule {
            name: "earnings-loose".to_string(),
            pattern: EARNINGS_LOOSE.to_string(),
            kind: PatternKind::Regex,
            requires: vec![],
            excludes: vec![],
            case_insensitive: true,
            earnings: true,
            tag: Some("earnings".to_string()),
        },
        TitleRule {
            name: "crypto-price".to_string(),
            pattern: COIN.to_string(),
            kind: PatternKind::Regex,
            requires: vec![PRICE_MOVE.to_string()],
            excludes: vec![SPEECH.to_string()],
            case_insensitive: true,
            earnings: false,
            tag: Some("crypto".to_string()),
        },
    ]
}
