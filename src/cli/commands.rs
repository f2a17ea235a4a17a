//! CLI command implementations

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::classify::{split_titles, TitleClassification};
use crate::config::Config;
use crate::export;
use crate::pipeline::Pipeline;
use crate::rank::TopN;

/// Command-line overrides applied on top of the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub top_n: Option<TopN>,
    pub seed: Option<u64>,
}

impl Overrides {
    /// Apply to a copy of `config` and re-validate
    pub fn apply(&self, config: &Config) -> Result<Config> {
        let mut config = config.clone();
        if let Some(input) = &self.input {
            config.input.path = input.clone();
        }
        if let Some(top_n) = self.top_n {
            config.export.top_n = top_n;
        }
        if let Some(seed) = self.seed {
            config.scoring.isolation.random_seed = seed;
        }
        config
            .validate()
            .context("Invalid command-line overrides")?;
        Ok(config)
    }
}

fn load_table(config: &Config) -> Result<export::TradeTable> {
    let path = &config.input.path;
    info!(path = %path.display(), "Reading trades");
    export::read_trades_path(path, config.input.delimiter_byte())
        .with_context(|| format!("Failed to read trades from {}", path.display()))
}

/// Full pipeline: ranked CSV plus the optional run summary
pub fn run(config: &Config, overrides: &Overrides) -> Result<()> {
    let mut config = overrides.apply(config)?;
    if let Some(output) = &overrides.output {
        config.export.output = output.clone();
    }

    let table = load_table(&config)?;
    let pipeline = Pipeline::from_config(&config)?;
    let output = pipeline.run(&table)?;

    if output.ranked.is_empty() {
        warn!("No wallets to export - writing header only");
    }

    let path = &config.export.output;
    export::write_ranked_path(path, &output.ranked)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), rows = output.ranked.len(), "Ranked wallets written");

    if let Some(summary_path) = &config.export.summary {
        export::write_json_path(summary_path, &output.summary)
            .with_context(|| format!("Failed to write {}", summary_path.display()))?;
        info!(path = %summary_path.display(), "Run summary written");
    }

    println!("\n=== EARNINGS RADAR ===\n");
    println!("Rows read:      {}", output.summary.input_rows);
    println!("Rows skipped:   {}", output.summary.skipped_rows);
    println!("Wallets scored: {}", output.summary.wallets);
    println!(
        "Markets:        {} ({} earnings)",
        output.summary.markets, output.summary.earnings_markets
    );
    println!("Exported:       {} -> {}", output.ranked.len(), path.display());

    if !output.ranked.is_empty() {
        println!("\n=== TOP WALLETS ===\n");
        for row in output.ranked.iter().take(10) {
            println!(
                "{:>4}  {:<44} {:>7.4}  {}",
                row.rank,
                row.wallet(),
                row.final_score,
                row.labels.join(",")
            );
        }
    }

    Ok(())
}

/// Feature Builder only
pub fn features(config: &Config, overrides: &Overrides) -> Result<()> {
    let config = overrides.apply(config)?;
    let output = overrides
        .output
        .clone()
        .unwrap_or_else(|| config.export.features_output.clone());

    let table = load_table(&config)?;
    let pipeline = Pipeline::from_config(&config)?;
    let (set, report) = pipeline.build_features(&table);

    export::write_features_path(&output, &set.wallets)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        path = %output.display(),
        wallets = set.len(),
        skipped = report.total_skipped(),
        "Wallet features written"
    );

    println!(
        "{} wallets from {} of {} rows -> {}",
        set.len(),
        report.accepted,
        report.total_rows,
        output.display()
    );
    Ok(())
}

/// Classify `|`-separated titles and print one JSON object per title
pub fn classify(config: &Config, titles: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;

    let results: Vec<(String, TitleClassification)> = split_titles(titles)
        .into_iter()
        .map(|title| {
            let classification = pipeline.classifier().classify(&title);
            (title, classification)
        })
        .collect();

    let json: Vec<serde_json::Value> = results
        .iter()
        .map(|(title, c)| {
            serde_json::json!({
                "title": title,
                "is_earnings_market": c.is_earnings_market,
                "ticker_tag": c.ticker_tag,
                "topic": c.topic,
                "matched_pattern": c.matched_pattern,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Show the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display());
    Ok(())
}
