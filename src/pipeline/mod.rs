//! Batch pipeline
//!
//! raw rows → validated trades → wallet features → feature matrix → anomaly
//! scores → rule boosts → ranked rows. Every stage is a pure function of its
//! input; nothing is kept between runs and no file is touched here.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::classify::TitleClassifier;
use crate::config::Config;
use crate::error::Result;
use crate::export::TradeTable;
use crate::features::{
    validate_trades, FeatureBuilder, FeatureConfig, FeatureSet, SkipReason, SkipReport,
};
use crate::rank::{self, ExportFilter, RankedRow, TopN};
use crate::rules::RuleEngine;
use crate::scoring::{score_matrix, FeatureMatrix, MatrixReport, ScoreSummary, ScoringConfig};

/// Simple population statistics over all scored wallets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulationStats {
    pub total_volume: f64,
    pub total_realized_pnl: f64,
    pub mean_win_rate: f64,
    pub mean_final_score: f64,
    pub earnings_wallets: usize,
    pub zero_window_wallets: usize,
}

/// Run summary written next to the ranked table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub input_rows: usize,
    pub accepted_rows: usize,
    pub skipped_rows: usize,
    pub skipped_by_reason: BTreeMap<SkipReason, usize>,
    pub wallets: usize,
    pub markets: usize,
    pub earnings_markets: usize,
    pub matrix: MatrixReport,
    pub scoring: ScoreSummary,
    pub random_seed: u64,
    pub exported_rows: usize,
    pub population: PopulationStats,
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Sorted, filtered and truncated rows for export
    pub ranked: Vec<RankedRow>,
    pub features: FeatureSet,
    pub summary: RunSummary,
}

/// Configured pipeline; cheap to run repeatedly on different inputs
pub struct Pipeline {
    classifier: TitleClassifier,
    features: FeatureConfig,
    scoring: ScoringConfig,
    rules: RuleEngine,
    filter: ExportFilter,
    top_n: TopN,
}

impl Pipeline {
    /// Validate the configuration and compile every stage
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let classifier = TitleClassifier::new(&config.classifier.rules)?;
        let rules = RuleEngine::from_config(&config.rules)?;
        debug!(
            title_rules = classifier.rule_count(),
            behavior_rules = rules.len(),
            "Pipeline configured"
        );
        Ok(Self {
            classifier,
            features: config.features.clone(),
            scoring: config.scoring.clone(),
            rules,
            filter: config.export.filter.clone(),
            top_n: config.export.top_n,
        })
    }

    pub fn classifier(&self) -> &TitleClassifier {
        &self.classifier
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Validation and the Feature Builder only
    pub fn build_features(&self, table: &TradeTable) -> (FeatureSet, SkipReport) {
        let (trades, mut report) = validate_trades(&table.rows);
        report.add_unreadable(table.unreadable);

        let set = FeatureBuilder::new(&self.classifier, self.features.clone()).build(&trades);
        (set, report)
    }

    /// Full run
    pub fn run(&self, table: &TradeTable) -> Result<RunOutput> {
        let (features, report) = self.build_features(table);

        let (matrix, matrix_report) = FeatureMatrix::from_features(&features.wallets);
        let (scores, score_summary) = score_matrix(&matrix, &self.scoring)?;

        let rows: Vec<RankedRow> = features
            .wallets
            .iter()
            .zip(scores)
            .map(|(wallet, score)| {
                let outcome = self.rules.apply(wallet, score.base_score);
                RankedRow {
                    rank: 0,
                    features: wallet.clone(),
                    score,
                    final_score: outcome.final_score,
                    labels: outcome.labels,
                }
            })
            .collect();

        let population = population_stats(&rows);
        let ranked = rank::rank(rows, &self.filter, self.top_n);

        let summary = RunSummary {
            input_rows: report.total_rows,
            accepted_rows: report.accepted,
            skipped_rows: report.total_skipped(),
            skipped_by_reason: report.skipped.clone(),
            wallets: features.len(),
            markets: features.markets.len(),
            earnings_markets: features.markets.values().filter(|m| m.is_earnings()).count(),
            matrix: matrix_report,
            scoring: score_summary,
            random_seed: self.scoring.isolation.random_seed,
            exported_rows: ranked.len(),
            population,
        };
        info!(
            wallets = summary.wallets,
            exported = summary.exported_rows,
            skipped = summary.skipped_rows,
            "Pipeline run complete"
        );

        Ok(RunOutput {
            ranked,
            features,
            summary,
        })
    }
}

fn population_stats(rows: &[RankedRow]) -> PopulationStats {
    if rows.is_empty() {
        return PopulationStats::default();
    }
    let n = rows.len() as f64;
    PopulationStats {
        total_volume: rows.iter().map(|r| r.features.total_volume).sum(),
        total_realized_pnl: rows.iter().map(|r| r.features.realized_pnl).sum(),
        mean_win_rate: rows.iter().map(|r| r.features.win_rate).sum::<f64>() / n,
        mean_final_score: rows.iter().map(|r| r.final_score).sum::<f64>() / n,
        earnings_wallets: rows
            .iter()
            .filter(|r| r.features.earnings_trade_count > 0)
            .count(),
        zero_window_wallets: rows.iter().filter(|r| r.features.zero_window).count(),
    }
}
