//! Isolation forest
//!
//! Each tree recursively splits a random sub-sample on a random feature at a
//! random value. Wallets that get isolated after few splits are unusual.
//! The score is `2^(-E[h(x)] / c(ψ))`: close to 1 for easy-to-isolate rows,
//! around 0.5 or below for ordinary ones.
//!
//! All randomness comes from one `StdRng` seeded from the configuration, so a
//! given seed and matrix always produce the same forest.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::matrix::FeatureMatrix;
use super::{AnomalyScorer, StrategyKind, StrategyOutput};
use crate::error::{Error, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Number of trees
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,

    /// Rows drawn (without replacement) per tree
    #[serde(default = "default_subsample_size")]
    pub subsample_size: usize,

    /// Expected outlier share; only derives the binary cutoff
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

fn default_ensemble_size() -> usize {
    100
}

fn default_subsample_size() -> usize {
    256
}

fn default_contamination() -> f64 {
    0.05
}

fn default_random_seed() -> u64 {
    42
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            ensemble_size: default_ensemble_size(),
            subsample_size: default_subsample_size(),
            contamination: default_contamination(),
            random_seed: default_random_seed(),
        }
    }
}

impl IsolationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ensemble_size == 0 {
            return Err(Error::invalid(
                "scoring.isolation.ensemble_size",
                "must be at least 1",
            ));
        }
        if self.subsample_size == 0 {
            return Err(Error::invalid(
                "scoring.isolation.subsample_size",
                "must be at least 1",
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(Error::invalid(
                "scoring.isolation.contamination",
                format!("must be in (0, 0.5], got {}", self.contamination),
            ));
        }
        Ok(())
    }
}

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            let harmonic = (n - 1.0).ln() + EULER_GAMMA;
            2.0 * harmonic - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(matrix: &FeatureMatrix, rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_node(matrix, rows, 0, height_limit, rng),
        }
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *value { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn grow_node(
    matrix: &FeatureMatrix,
    rows: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    // Only features that still vary within this node can split it
    let candidates: Vec<(usize, f64, f64)> = (0..matrix.n_cols())
        .filter_map(|col| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = matrix.row(r)[col];
                (lo.min(v), hi.max(v))
            });
            (hi > lo).then_some((col, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    // In [lo, hi): both sides of `<= value` stay non-empty
    let value = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| matrix.row(r)[feature] <= value);

    Node::Split {
        feature,
        value,
        left: Box::new(grow_node(matrix, left, depth + 1, height_limit, rng)),
        right: Box::new(grow_node(matrix, right, depth + 1, height_limit, rng)),
    }
}

/// Isolation forest scorer
#[derive(Debug, Clone)]
pub struct IsolationScorer {
    config: IsolationConfig,
}

impl IsolationScorer {
    pub fn new(config: IsolationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Raw isolation scores in matrix row order
    pub fn scores(&self, matrix: &FeatureMatrix) -> Vec<f64> {
        let n = matrix.n_rows();
        let psi = self.config.subsample_size.min(n);
        let norm = average_path_length(psi);
        if norm <= 0.0 {
            return vec![0.5; n];
        }
        let height_limit = (psi as f64).log2().ceil() as usize;

        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        let forest: Vec<IsolationTree> = (0..self.config.ensemble_size)
            .map(|_| {
                let sample = index::sample(&mut rng, n, psi).into_vec();
                IsolationTree::grow(matrix, sample, height_limit, &mut rng)
            })
            .collect();
        debug!(trees = forest.len(), psi, height_limit, "Isolation forest grown");

        (0..n)
            .map(|i| {
                let row = matrix.row(i);
                let total: f64 = forest.iter().map(|t| t.path_length(row)).sum();
                let mean = total / forest.len() as f64;
                2f64.powf(-mean / norm)
            })
            .collect()
    }

    /// Flags for the `ceil(contamination * n)` highest scores (ties included)
    pub fn cutoff_flags(&self, scores: &[f64]) -> Vec<bool> {
        if scores.is_empty() {
            return Vec::new();
        }
        let k = ((self.config.contamination * scores.len() as f64).ceil() as usize)
            .clamp(1, scores.len());
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let threshold = sorted[k - 1];
        scores.iter().map(|&s| s >= threshold).collect()
    }
}

impl AnomalyScorer for IsolationScorer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Isolation
    }

    fn score(&self, matrix: &FeatureMatrix) -> StrategyOutput {
        let n = matrix.n_rows();
        if matrix.is_degenerate() {
            return StrategyOutput::neutral(self.kind(), n);
        }

        let scores = self.scores(matrix);
        let flagged = self.cutoff_flags(&scores);
        info!(
            wallets = n,
            outliers = flagged.iter().filter(|&&f| f).count(),
            seed = self.config.random_seed,
            "Isolation scoring complete"
        );

        StrategyOutput {
            kind: self.kind(),
            scores,
            flagged,
            labels: None,
        }
    }
}
