//! Core record types shared across pipeline stages

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::classify::TitleClassification;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" => Ok(Side::Buy),
            "sell" | "s" | "ask" => Ok(Side::Sell),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Liquidity role of the wallet in a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Taker,
    Maker,
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "taker" => Ok(Role::Taker),
            "maker" => Ok(Role::Maker),
            _ => Err(()),
        }
    }
}

/// One unvalidated row of the trade table
///
/// Every field is optional text so that a malformed row can still be read
/// and then counted by reason instead of failing the whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrade {
    #[serde(default, alias = "proxyWallet", alias = "user", alias = "wallet_id")]
    pub wallet: Option<String>,
    #[serde(default, alias = "market", alias = "conditionId", alias = "market_slug")]
    pub market_id: Option<String>,
    #[serde(default, alias = "market_title")]
    pub title: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default, alias = "ts", alias = "time")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default, alias = "realizedPnl", alias = "pnl_usd")]
    pub pnl: Option<String>,
}

/// A validated, immutable trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub wallet: String,
    /// Market key: explicit market id when present, otherwise the title
    pub market: String,
    pub title: String,
    pub outcome: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub role: Option<Role>,
    /// Shares traded
    pub size: f64,
    /// Price per share (0.0 to 1.0)
    pub price: f64,
    /// Reported PnL contribution, if the export carries one
    pub pnl: Option<f64>,
}

impl Trade {
    /// Cash value of the fill
    pub fn notional(&self) -> f64 {
        self.size * self.price
    }
}

/// A market seen in the trade set, enriched by the title classifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Market {
    pub key: String,
    pub title: String,
    pub classification: TitleClassification,
}

impl Market {
    pub fn is_earnings(&self) -> bool {
        self.classification.is_earnings_market
    }
}

/// Parse a timestamp as exported by the venue or by notebooks
///
/// Accepts unix seconds, unix milliseconds, RFC 3339, `YYYY-MM-DD HH:MM:SS`
/// and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(n) = s.parse::<i64>() {
        // Anything past year 5138 in seconds is really milliseconds
        return if n.abs() >= 100_000_000_000 {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
    }

    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            let millis = if f.abs() >= 1e11 { f } else { f * 1000.0 };
            return Utc.timestamp_millis_opt(millis.round() as i64).single();
        }
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse() {
        assert_eq!("BUY".parse::<Side>(), Ok(Side::Buy));
        assert_eq!(" sell ".parse::<Side>(), Ok(Side::Sell));
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Taker".parse::<Role>(), Ok(Role::Taker));
        assert_eq!("maker".parse::<Role>(), Ok(Role::Maker));
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let secs = parse_timestamp("1731283200").unwrap();
        let millis = parse_timestamp("1731283200000").unwrap();
        let rfc = parse_timestamp("2024-11-11T00:00:00Z").unwrap();
        let naive = parse_timestamp("2024-11-11 00:00:00").unwrap();
        let date = parse_timestamp("2024-11-11").unwrap();

        assert_eq!(secs, millis);
        assert_eq!(secs, rfc);
        assert_eq!(secs, naive);
        assert_eq!(secs, date);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("NaN").is_none());
    }

    #[test]
    fn test_notional() {
        let trade = Trade {
            wallet: "0xabc".into(),
            market: "m1".into(),
            title: "Will it rain?".into(),
            outcome: None,
            timestamp: parse_timestamp("2024-11-11").unwrap(),
            side: Side::Buy,
            role: Some(Role::Taker),
            size: 200.0,
            price: 0.25,
            pnl: None,
        };
        assert!((trade.notional() - 50.0).abs() < 1e-9);
    }
}
