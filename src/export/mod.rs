//! Tabular I/O
//!
//! Reads the trade table, writes the ranked and feature tables, and reads a
//! ranked table back for round-trip checks. Floats are written with Rust's
//! shortest round-trip formatting and timestamps as RFC 3339, so re-reading
//! an export yields the same values.

use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::features::{WalletFeatures, WalletTags};
use crate::rank::{ExportFilter, RankedRow, TopN};
use crate::scoring::{ClusterLabel, WalletScore};
use crate::types::RawTrade;

/// Separator for list-valued cells (labels, tickers, topics)
pub const LIST_SEPARATOR: char = ';';

/// Trade table location and format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_input_path")]
    pub path: PathBuf,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_input_path() -> PathBuf {
    PathBuf::from("trades.csv")
}

fn default_delimiter() -> char {
    ','
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            delimiter: default_delimiter(),
        }
    }
}

impl InputConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() || self.delimiter == '"' {
            return Err(Error::invalid(
                "input.delimiter",
                format!(
                    "must be a single ASCII character other than '\"', got {:?}",
                    self.delimiter
                ),
            ));
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }
}

/// Output locations, top-N and export filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Ranked wallet table
    #[serde(default = "default_output_path")]
    pub output: PathBuf,

    /// Wallet feature table written by the `features` command
    #[serde(default = "default_features_path")]
    pub features_output: PathBuf,

    /// JSON run summary; omitted when unset
    #[serde(default = "default_summary_path")]
    pub summary: Option<PathBuf>,

    #[serde(default)]
    pub top_n: TopN,

    #[serde(default)]
    pub filter: ExportFilter,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("ranked_wallets.csv")
}

fn default_features_path() -> PathBuf {
    PathBuf::from("wallet_features.csv")
}

fn default_summary_path() -> Option<PathBuf> {
    Some(PathBuf::from("run_summary.json"))
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output: default_output_path(),
            features_output: default_features_path(),
            summary: default_summary_path(),
            top_n: TopN::default(),
            filter: ExportFilter::default(),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        self.top_n.validate()?;
        if let Some(min) = self.filter.min_final_score {
            if !min.is_finite() {
                return Err(Error::invalid("export.filter.min_final_score", "must be finite"));
            }
        }
        Ok(())
    }
}

/// Raw rows of a trade table
#[derive(Debug, Clone, Default)]
pub struct TradeTable {
    pub rows: Vec<RawTrade>,
    /// Rows the CSV reader could not decode at all
    pub unreadable: usize,
}

/// Header names accepted for each trade field, canonical name first
const TRADE_HEADER_ALIASES: &[&[&str]] = &[
    &["wallet", "proxyWallet", "user", "wallet_id"],
    &["market_id", "market", "conditionId", "market_slug"],
    &["title", "market_title"],
    &["timestamp", "ts", "time"],
    &["pnl", "realizedPnl", "pnl_usd"],
];

fn canonical_trade_field(header: &str) -> &str {
    TRADE_HEADER_ALIASES
        .iter()
        .find(|aliases| aliases.contains(&header))
        .map(|aliases| aliases[0])
        .unwrap_or(header)
}

/// Rename every column after the first one that maps to the same field
///
/// serde rejects a row whose header names one field twice, so without this
/// a file carrying both `wallet` and `proxyWallet` would be entirely
/// unreadable.
fn dedupe_trade_headers(headers: &StringRecord) -> (StringRecord, Vec<String>) {
    let mut seen = BTreeSet::new();
    let mut shadowed = Vec::new();
    let renamed: StringRecord = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if seen.insert(canonical_trade_field(h).to_string()) {
                h.to_string()
            } else {
                shadowed.push(h.to_string());
                format!("_ignored_{}_{}", i, h)
            }
        })
        .collect();
    (renamed, shadowed)
}

/// Read a trade table; undecodable rows are counted, not fatal
pub fn read_trades<R: Read>(reader: R, delimiter: u8) -> Result<TradeTable> {
    let mut csv = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let (headers, shadowed) = dedupe_trade_headers(csv.headers()?);
    if !shadowed.is_empty() {
        warn!(ignored = ?shadowed, "Trade table repeats a column under another name; keeping the first");
        csv.set_headers(headers.clone());
    }
    if !headers.iter().any(|h| canonical_trade_field(h) == "wallet") {
        warn!(headers = ?headers, "Trade table has no wallet column; every row will be skipped");
    }

    let mut table = TradeTable::default();
    for (idx, record) in csv.deserialize::<RawTrade>().enumerate() {
        match record {
            Ok(row) => table.rows.push(row),
            Err(e) => {
                debug!(row = idx, error = %e, "Unreadable trade row");
                table.unreadable += 1;
            }
        }
    }

    info!(rows = table.rows.len(), unreadable = table.unreadable, "Read trade table");
    Ok(table)
}

/// Read a trade table from disk
pub fn read_trades_path(path: &Path, delimiter: u8) -> Result<TradeTable> {
    let file = File::open(path)
        .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
    read_trades(file, delimiter)
}

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(&LIST_SEPARATOR.to_string())
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

const FEATURE_HEADERS: &[&str] = &[
    "wallet",
    "trade_count",
    "market_count",
    "earnings_trade_count",
    "earnings_market_count",
    "earnings_focus_ratio",
    "earnings_issuers",
    "concentration",
    "buy_sell_asymmetry",
    "taker_ratio",
    "total_volume",
    "avg_trade_size",
    "realized_pnl",
    "winning_markets",
    "losing_markets",
    "win_rate",
    "earnings_wins",
    "first_trade",
    "last_trade",
    "active_window_secs",
    "zero_window",
    "trades_per_day",
    "activity",
    "traded_crypto",
    "earnings_tickers",
    "topics",
    "matched_patterns",
];

const SCORE_HEADERS: &[&str] = &[
    "cluster",
    "density_score",
    "density_outlier",
    "isolation_score",
    "isolation_outlier",
    "base_score",
    "rule_labels",
    "final_score",
];

fn feature_fields(f: &WalletFeatures) -> Vec<String> {
    vec![
        f.wallet.clone(),
        f.trade_count.to_string(),
        f.market_count.to_string(),
        f.earnings_trade_count.to_string(),
        f.earnings_market_count.to_string(),
        f.earnings_focus_ratio.to_string(),
        f.earnings_issuers.to_string(),
        f.concentration.to_string(),
        f.buy_sell_asymmetry.to_string(),
        f.taker_ratio.to_string(),
        f.total_volume.to_string(),
        f.avg_trade_size.to_string(),
        f.realized_pnl.to_string(),
        f.winning_markets.to_string(),
        f.losing_markets.to_string(),
        f.win_rate.to_string(),
        f.earnings_wins.to_string(),
        fmt_time(&f.first_trade),
        fmt_time(&f.last_trade),
        f.active_window_secs.to_string(),
        f.zero_window.to_string(),
        f.trades_per_day.to_string(),
        f.activity.to_string(),
        f.traded_crypto.to_string(),
        join(&f.tags.earnings_tickers),
        join(&f.tags.topics),
        join(&f.tags.matched_patterns),
    ]
}

fn score_fields(row: &RankedRow) -> Vec<String> {
    let s = &row.score;
    vec![
        opt(s.cluster),
        opt(s.density_score),
        s.density_outlier.to_string(),
        opt(s.isolation_score),
        s.isolation_outlier.to_string(),
        s.base_score.to_string(),
        row.labels.join(&LIST_SEPARATOR.to_string()),
        row.final_score.to_string(),
    ]
}

/// Write the ranked table: rank, wallet, features, scores, labels, final score
pub fn write_ranked<W: Write>(writer: W, rows: &[RankedRow]) -> Result<()> {
    let mut csv = WriterBuilder::new().from_writer(writer);

    let mut header = vec!["rank"];
    header.extend_from_slice(FEATURE_HEADERS);
    header.extend_from_slice(SCORE_HEADERS);
    csv.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.rank.to_string()];
        record.extend(feature_fields(&row.features));
        record.extend(score_fields(row));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the ranked table to disk
pub fn write_ranked_path(path: &Path, rows: &[RankedRow]) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
    write_ranked(file, rows)?;
    info!(path = %path.display(), rows = rows.len(), "Wrote ranked wallets");
    Ok(())
}

/// Write the wallet feature table
pub fn write_features<W: Write>(writer: W, features: &[WalletFeatures]) -> Result<()> {
    let mut csv = WriterBuilder::new().from_writer(writer);
    csv.write_record(FEATURE_HEADERS)?;
    for f in features {
        csv.write_record(feature_fields(f))?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the wallet feature table to disk
pub fn write_features_path(path: &Path, features: &[WalletFeatures]) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
    write_features(file, features)?;
    info!(path = %path.display(), wallets = features.len(), "Wrote wallet features");
    Ok(())
}

/// Write any serializable value as pretty JSON
pub fn write_json_path<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    debug!(path = %path.display(), "Wrote JSON");
    Ok(())
}

/// Header name → column index, checked up front
struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &StringRecord, required: &[&str]) -> Result<Self> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_string(), i))
            .collect();
        if let Some(missing) = required.iter().find(|name| !index.contains_key(**name)) {
            return Err(Error::MissingColumn(missing.to_string()));
        }
        Ok(Self { index })
    }

    fn text<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.index
            .get(name)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
    }

    fn parse<T: FromStr>(&self, record: &StringRecord, name: &str, line: usize) -> Result<T> {
        let text = self.text(record, name);
        text.parse()
            .map_err(|_| Error::Csv(format!("line {}: invalid `{}` value `{}`", line, name, text)))
    }

    fn parse_opt<T: FromStr>(&self, record: &StringRecord, name: &str, line: usize) -> Result<Option<T>> {
        match self.text(record, name) {
            "" => Ok(None),
            _ => self.parse(record, name, line).map(Some),
        }
    }

    fn time(&self, record: &StringRecord, name: &str, line: usize) -> Result<DateTime<Utc>> {
        let text = self.text(record, name);
        DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| Error::Csv(format!("line {}: invalid `{}` timestamp `{}`", line, name, text)))
    }

    fn set(&self, record: &StringRecord, name: &str) -> BTreeSet<String> {
        split_list(self.text(record, name)).collect()
    }
}

fn split_list(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(LIST_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read a ranked table written by [`write_ranked`]
pub fn read_ranked<R: Read>(reader: R) -> Result<Vec<RankedRow>> {
    let mut csv = ReaderBuilder::new().from_reader(reader);
    let headers = csv.headers()?.clone();

    let mut required = vec!["rank"];
    required.extend_from_slice(FEATURE_HEADERS);
    required.extend_from_slice(SCORE_HEADERS);
    let cols = Columns::new(&headers, &required)?;

    let mut rows = Vec::new();
    for (idx, record) in csv.records().enumerate() {
        let record = record?;
        // Header is line 1
        let line = idx + 2;

        let activity = cols.text(&record, "activity");
        let features = WalletFeatures {
            wallet: cols.text(&record, "wallet").to_string(),
            trade_count: cols.parse(&record, "trade_count", line)?,
            market_count: cols.parse(&record, "market_count", line)?,
            earnings_trade_count: cols.parse(&record, "earnings_trade_count", line)?,
            earnings_market_count: cols.parse(&record, "earnings_market_count", line)?,
            earnings_focus_ratio: cols.parse(&record, "earnings_focus_ratio", line)?,
            earnings_issuers: cols.parse(&record, "earnings_issuers", line)?,
            concentration: cols.parse(&record, "concentration", line)?,
            buy_sell_asymmetry: cols.parse(&record, "buy_sell_asymmetry", line)?,
            taker_ratio: cols.parse(&record, "taker_ratio", line)?,
            total_volume: cols.parse(&record, "total_volume", line)?,
            avg_trade_size: cols.parse(&record, "avg_trade_size", line)?,
            realized_pnl: cols.parse(&record, "realized_pnl", line)?,
            winning_markets: cols.parse(&record, "winning_markets", line)?,
            losing_markets: cols.parse(&record, "losing_markets", line)?,
            win_rate: cols.parse(&record, "win_rate", line)?,
            earnings_wins: cols.parse(&record, "earnings_wins", line)?,
            first_trade: cols.time(&record, "first_trade", line)?,
            last_trade: cols.time(&record, "last_trade", line)?,
            active_window_secs: cols.parse(&record, "active_window_secs", line)?,
            zero_window: cols.parse(&record, "zero_window", line)?,
            trades_per_day: cols.parse(&record, "trades_per_day", line)?,
            activity: activity.parse().map_err(|_| {
                Error::Csv(format!("line {}: invalid `activity` value `{}`", line, activity))
            })?,
            traded_crypto: cols.parse(&record, "traded_crypto", line)?,
            tags: WalletTags {
                earnings_tickers: cols.set(&record, "earnings_tickers"),
                topics: cols.set(&record, "topics"),
                matched_patterns: cols.set(&record, "matched_patterns"),
            },
        };

        let score = WalletScore {
            cluster: cols.parse_opt::<ClusterLabel>(&record, "cluster", line)?,
            density_score: cols.parse_opt(&record, "density_score", line)?,
            density_outlier: cols.parse(&record, "density_outlier", line)?,
            isolation_score: cols.parse_opt(&record, "isolation_score", line)?,
            isolation_outlier: cols.parse(&record, "isolation_outlier", line)?,
            base_score: cols.parse(&record, "base_score", line)?,
        };

        rows.push(RankedRow {
            rank: cols.parse(&record, "rank", line)?,
            features,
            score,
            final_score: cols.parse(&record, "final_score", line)?,
            labels: split_list(cols.text(&record, "rule_labels")).collect(),
        });
    }
    Ok(rows)
}

/// Read a ranked table from disk
pub fn read_ranked_path(path: &Path) -> Result<Vec<RankedRow>> {
    let file = File::open(path)
        .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
    read_ranked(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ActivityPattern;
    use crate::types::parse_timestamp;

    const TRADES_CSV: &str = "\
wallet,market_id,title,outcome,timestamp,side,role,size,price,pnl
0xaaa,m1,Will Oklo (OKLO) beat quarterly earnings?,Yes,2024-11-11T14:00:00Z,BUY,taker,100,0.42,
0xbbb,m2,\"Bitcoin above $100k, Friday?\",No,1731283200,sell,maker,25.5,0.61,3.2
";

    fn ranked_row() -> RankedRow {
        RankedRow {
            rank: 3,
            features: WalletFeatures {
                wallet: "0xabc".into(),
                trade_count: 7,
                market_count: 2,
                earnings_trade_count: 5,
                earnings_market_count: 1,
                earnings_focus_ratio: 5.0 / 7.0,
                earnings_issuers: 1,
                concentration: 0.734_693_877_551_020_4,
                buy_sell_asymmetry: -0.1,
                taker_ratio: 2.0 / 3.0,
                total_volume: 1234.567,
                avg_trade_size: 1234.567 / 7.0,
                realized_pnl: -12.25,
                winning_markets: 1,
                losing_markets: 1,
                win_rate: 0.5,
                earnings_wins: 1,
                first_trade: parse_timestamp("2024-11-01T09:30:00Z").unwrap(),
                last_trade: parse_timestamp("2024-11-04T16:00:00Z").unwrap(),
                active_window_secs: 282_600,
                zero_window: false,
                trades_per_day: 7.0 / (282_600.0 / 86_400.0),
                activity: ActivityPattern::Sustained,
                traded_crypto: true,
                tags: WalletTags {
                    earnings_tickers: ["OKLO".to_string()].into(),
                    topics: ["crypto".to_string(), "earnings".to_string()].into(),
                    matched_patterns: ["crypto-price".to_string(), "earnings-strict".to_string()]
                        .into(),
                },
            },
            score: WalletScore {
                cluster: Some(ClusterLabel::Noise),
                density_score: Some(0.812_345_678_9),
                density_outlier: true,
                isolation_score: Some(0.634_1),
                isolation_outlier: false,
                base_score: 0.817_05,
            },
            final_score: 1.067_05,
            labels: vec!["concentrated-earnings-wins".into(), "multi-issuer-earnings".into()],
        }
    }

    #[test]
    fn test_read_trades() {
        let table = read_trades(TRADES_CSV.as_bytes(), b',').unwrap();
        assert_eq!(table.unreadable, 0);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].wallet.as_deref(), Some("0xaaa"));
        assert_eq!(table.rows[0].pnl, None);
        assert_eq!(table.rows[1].title.as_deref(), Some("Bitcoin above $100k, Friday?"));
        assert_eq!(table.rows[1].pnl.as_deref(), Some("3.2"));
    }

    #[test]
    fn test_read_trades_aliases_and_delimiter() {
        let data = "proxyWallet;conditionId;ts;side;size;price\n0xccc;c1;2024-11-11;buy;1;0.5\n";
        let table = read_trades(data.as_bytes(), b';').unwrap();
        assert_eq!(table.rows[0].wallet.as_deref(), Some("0xccc"));
        assert_eq!(table.rows[0].market_id.as_deref(), Some("c1"));
        assert_eq!(table.rows[0].timestamp.as_deref(), Some("2024-11-11"));
    }

    #[test]
    fn test_read_trades_repeated_field_keeps_first() {
        let data = "wallet,proxyWallet,market_id,timestamp,side,size,price\n\
                    0xfirst,0xsecond,m1,1731283200,buy,1,0.5\n";
        let table = read_trades(data.as_bytes(), b',').unwrap();
        assert_eq!(table.unreadable, 0);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].wallet.as_deref(), Some("0xfirst"));
        assert_eq!(table.rows[0].market_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_ranked_round_trip() {
        let rows = vec![ranked_row()];
        let mut buf = Vec::new();
        write_ranked(&mut buf, &rows).unwrap();

        let back = read_ranked(buf.as_slice()).unwrap();
        assert_eq!(back.len(), 1);
        let (a, b) = (&rows[0], &back[0]);
        assert_eq!(a.rank, b.rank);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.score.cluster, b.score.cluster);
        assert_eq!(a.features.tags, b.features.tags);
        assert_eq!(a.features.first_trade, b.features.first_trade);
        assert!((a.features.earnings_focus_ratio - b.features.earnings_focus_ratio).abs() < 1e-12);
        assert!((a.final_score - b.final_score).abs() < 1e-12);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_ranked_table_has_header() {
        let mut buf = Vec::new();
        write_ranked(&mut buf, &[]).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("rank,wallet,trade_count"));
        assert!(read_ranked(buf.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_column() {
        let err = read_ranked("rank,wallet\n1,0xabc\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MissingColumn(_)));
    }

    #[test]
    fn test_features_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_features_path(&path, &[ranked_row().features]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), FEATURE_HEADERS.len());
        assert!(lines.next().unwrap().starts_with("0xabc,7,2,5,1,"));
    }

    #[test]
    fn test_config_validation() {
        assert!(ExportConfig::default().validate().is_ok());
        assert!(InputConfig::default().validate().is_ok());

        let input = InputConfig {
            delimiter: 'é',
            ..Default::default()
        };
        assert!(input.validate().is_err());

        let export = ExportConfig {
            top_n: TopN::Count(0),
            ..Default::default()
        };
        assert!(export.validate().unwrap_err().is_config_error());
    }
}
