//! Anomaly scoring
//!
//! Two interchangeable strategies implement [`AnomalyScorer`] over the same
//! [`FeatureMatrix`]: density clustering (outlier = not in a dense cluster)
//! and an isolation forest (outlier = quick to isolate). Configuration picks
//! which ones run; their outputs are merged into one base score per wallet.

pub mod density;
pub mod isolation;
pub mod matrix;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub use density::{ClusterLabel, DensityConfig, DensityScorer};
pub use isolation::{IsolationConfig, IsolationScorer};
pub use matrix::{FeatureMatrix, MatrixReport};

/// Scoring strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Density,
    Isolation,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Density => write!(f, "density"),
            StrategyKind::Isolation => write!(f, "isolation"),
        }
    }
}

/// Per-wallet output of one strategy, in matrix row order
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutput {
    pub kind: StrategyKind,
    /// Density: distance to nearest core point over the population maximum.
    /// Isolation: `2^(-E[h]/c(ψ))`.
    pub scores: Vec<f64>,
    /// Density: noise. Isolation: above the contamination cutoff.
    pub flagged: Vec<bool>,
    /// Cluster labels (density only)
    pub labels: Option<Vec<ClusterLabel>>,
}

impl StrategyOutput {
    /// Zero scores and no flags, used when there is nothing to score
    pub fn neutral(kind: StrategyKind, n: usize) -> Self {
        Self {
            kind,
            scores: vec![0.0; n],
            flagged: vec![false; n],
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<ClusterLabel>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Value this strategy adds to the combined score for row `i`
    ///
    /// Density noise counts as fully anomalous; clustered points contribute
    /// their continuity score.
    pub fn contribution(&self, i: usize) -> f64 {
        match self.kind {
            StrategyKind::Density if self.flagged[i] => 1.0,
            _ => self.scores[i],
        }
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged.iter().filter(|&&f| f).count()
    }
}

/// Capability shared by both strategies
pub trait AnomalyScorer {
    fn kind(&self) -> StrategyKind;

    /// One score per matrix row; must be deterministic for a given matrix
    fn score(&self, matrix: &FeatureMatrix) -> StrategyOutput;
}

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Strategies to run
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,

    /// Weight of the density contribution in the base score
    #[serde(default = "default_weight")]
    pub density_weight: f64,

    /// Weight of the isolation score in the base score
    #[serde(default = "default_weight")]
    pub isolation_weight: f64,

    #[serde(default)]
    pub density: DensityConfig,

    #[serde(default)]
    pub isolation: IsolationConfig,
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![StrategyKind::Density, StrategyKind::Isolation]
}

fn default_weight() -> f64 {
    1.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            density_weight: default_weight(),
            isolation_weight: default_weight(),
            density: DensityConfig::default(),
            isolation: IsolationConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn enabled(&self, kind: StrategyKind) -> bool {
        self.strategies.contains(&kind)
    }

    pub fn weight(&self, kind: StrategyKind) -> f64 {
        match kind {
            StrategyKind::Density => self.density_weight,
            StrategyKind::Isolation => self.isolation_weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(Error::invalid(
                "scoring.strategies",
                "at least one strategy must be selected",
            ));
        }
        for (name, weight) in [
            ("scoring.density_weight", self.density_weight),
            ("scoring.isolation_weight", self.isolation_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(Error::invalid(name, format!("must be >= 0, got {}", weight)));
            }
        }
        let total: f64 = self.active_strategies().map(|k| self.weight(k)).sum();
        if total <= 0.0 {
            return Err(Error::invalid(
                "scoring.strategies",
                "selected strategies have zero total weight",
            ));
        }
        if self.enabled(StrategyKind::Density) {
            self.density.validate()?;
        }
        if self.enabled(StrategyKind::Isolation) {
            self.isolation.validate()?;
        }
        Ok(())
    }

    /// Selected strategies, de-duplicated, in a fixed order
    pub fn active_strategies(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        [StrategyKind::Density, StrategyKind::Isolation]
            .into_iter()
            .filter(|k| self.enabled(*k))
    }

    /// Instantiate the selected scorers
    pub fn build_scorers(&self) -> Result<Vec<Box<dyn AnomalyScorer>>> {
        self.active_strategies()
            .map(|kind| {
                let scorer: Box<dyn AnomalyScorer> = match kind {
                    StrategyKind::Density => Box::new(DensityScorer::new(self.density.clone())?),
                    StrategyKind::Isolation => {
                        Box::new(IsolationScorer::new(self.isolation.clone())?)
                    }
                };
                Ok::<_, Error>(scorer)
            })
            .collect()
    }
}

/// Combined scores for one wallet
#[derive(Debug, Clone, PartialEq)]
pub struct WalletScore {
    pub cluster: Option<ClusterLabel>,
    pub density_score: Option<f64>,
    pub density_outlier: bool,
    pub isolation_score: Option<f64>,
    pub isolation_outlier: bool,
    /// Weighted mean of the enabled strategies' contributions
    pub base_score: f64,
}

impl WalletScore {
    /// Flagged by density and isolation in the same run
    pub fn flagged_by_both(&self) -> bool {
        self.density_outlier && self.isolation_outlier
    }
}

/// Run-level scoring counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub strategies: Vec<StrategyKind>,
    pub clusters: Option<usize>,
    pub density_outliers: usize,
    pub isolation_outliers: usize,
    pub flagged_by_both: usize,
}

/// Merge strategy outputs into per-wallet scores
pub fn combine(outputs: &[StrategyOutput], config: &ScoringConfig, n: usize) -> Vec<WalletScore> {
    let total_weight: f64 = outputs.iter().map(|o| config.weight(o.kind)).sum();

    (0..n)
        .map(|i| {
            let mut score = WalletScore {
                cluster: None,
                density_score: None,
                density_outlier: false,
                isolation_score: None,
                isolation_outlier: false,
                base_score: 0.0,
            };
            let mut weighted = 0.0;
            for out in outputs {
                weighted += config.weight(out.kind) * out.contribution(i);
                match out.kind {
                    StrategyKind::Density => {
                        score.cluster = out.labels.as_ref().map(|l| l[i]);
                        score.density_score = Some(out.scores[i]);
                        score.density_outlier = out.flagged[i];
                    }
                    StrategyKind::Isolation => {
                        score.isolation_score = Some(out.scores[i]);
                        score.isolation_outlier = out.flagged[i];
                    }
                }
            }
            score.base_score = if total_weight > 0.0 {
                weighted / total_weight
            } else {
                0.0
            };
            score
        })
        .collect()
}

/// Run every selected scorer on the matrix and combine the results
pub fn score_matrix(
    matrix: &FeatureMatrix,
    config: &ScoringConfig,
) -> Result<(Vec<WalletScore>, ScoreSummary)> {
    if matrix.is_degenerate() && matrix.n_rows() > 0 {
        warn!(
            wallets = matrix.n_rows(),
            "No feature column varies - every wallet gets a neutral score"
        );
    }

    let outputs: Vec<StrategyOutput> = config
        .build_scorers()?
        .iter()
        .map(|scorer| scorer.score(matrix))
        .collect();

    let scores = combine(&outputs, config, matrix.n_rows());

    let mut summary = ScoreSummary {
        strategies: outputs.iter().map(|o| o.kind).collect(),
        flagged_by_both: scores.iter().filter(|s| s.flagged_by_both()).count(),
        ..Default::default()
    };
    for out in &outputs {
        match out.kind {
            StrategyKind::Density => {
                summary.density_outliers = out.flagged_count();
                summary.clusters = out.labels.as_ref().map(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| match l {
                            ClusterLabel::Cluster(id) => Some(*id + 1),
                            ClusterLabel::Noise => None,
                        })
                        .max()
                        .unwrap_or(0)
                });
            }
            StrategyKind::Isolation => summary.isolation_outliers = out.flagged_count(),
        }
    }

    info!(
        wallets = matrix.n_rows(),
        columns = matrix.n_cols(),
        density_outliers = summary.density_outliers,
        isolation_outliers = summary.isolation_outliers,
        flagged_by_both = summary.flagged_by_both,
        "Scoring complete"
    );
    Ok((scores, summary))
}
