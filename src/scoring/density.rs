//! Density clustering
//!
//! DBSCAN over the standardized feature space. Rows are visited in matrix
//! order (wallet id ascending), so a border point reachable from two clusters
//! always lands in the one discovered first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::matrix::{euclidean, FeatureMatrix};
use super::{AnomalyScorer, StrategyKind, StrategyOutput};
use crate::error::{Error, Result};

/// Density clustering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Neighborhood radius ε in standardized units
    #[serde(default = "default_neighborhood_radius")]
    pub neighborhood_radius: f64,

    /// Points within ε (the point itself included) needed for a core point
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: usize,
}

fn default_neighborhood_radius() -> f64 {
    1.5
}

fn default_min_neighbors() -> usize {
    5
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            neighborhood_radius: default_neighborhood_radius(),
            min_neighbors: default_min_neighbors(),
        }
    }
}

impl DensityConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.neighborhood_radius.is_finite() && self.neighborhood_radius > 0.0) {
            return Err(Error::invalid(
                "scoring.density.neighborhood_radius",
                format!("must be positive, got {}", self.neighborhood_radius),
            ));
        }
        if self.min_neighbors == 0 {
            return Err(Error::invalid(
                "scoring.density.min_neighbors",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Cluster membership of one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterLabel {
    Noise,
    Cluster(usize),
}

impl ClusterLabel {
    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Noise => write!(f, "noise"),
            ClusterLabel::Cluster(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ClusterLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "noise" => Ok(ClusterLabel::Noise),
            other => other
                .parse()
                .map(ClusterLabel::Cluster)
                .map_err(|_| Error::Csv(format!("invalid cluster label `{}`", other))),
        }
    }
}

/// DBSCAN scorer
#[derive(Debug, Clone)]
pub struct DensityScorer {
    config: DensityConfig,
}

impl DensityScorer {
    pub fn new(config: DensityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn neighbors(&self, matrix: &FeatureMatrix, i: usize) -> Vec<usize> {
        let eps = self.config.neighborhood_radius;
        let row = matrix.row(i);
        (0..matrix.n_rows())
            .filter(|&j| euclidean(row, matrix.row(j)) <= eps)
            .collect()
    }

    /// Cluster labels and core-point flags
    pub fn cluster(&self, matrix: &FeatureMatrix) -> (Vec<ClusterLabel>, Vec<bool>) {
        let n = matrix.n_rows();
        let min_pts = self.config.min_neighbors;

        let mut labels: Vec<Option<ClusterLabel>> = vec![None; n];
        let mut core = vec![false; n];
        let mut next_cluster = 0usize;

        for i in 0..n {
            if labels[i].is_some() {
                continue;
            }
            let seeds = self.neighbors(matrix, i);
            if seeds.len() < min_pts {
                labels[i] = Some(ClusterLabel::Noise);
                continue;
            }

            let cluster = ClusterLabel::Cluster(next_cluster);
            next_cluster += 1;
            labels[i] = Some(cluster);
            core[i] = true;

            let mut queue: VecDeque<usize> = seeds.into_iter().filter(|&j| j != i).collect();
            while let Some(j) = queue.pop_front() {
                match labels[j] {
                    // Noise reached from a core point becomes a border point
                    Some(ClusterLabel::Noise) => labels[j] = Some(cluster),
                    Some(ClusterLabel::Cluster(_)) => {}
                    None => {
                        labels[j] = Some(cluster);
                        let reach = self.neighbors(matrix, j);
                        if reach.len() >= min_pts {
                            core[j] = true;
                            queue.extend(reach.into_iter().filter(|&k| {
                                !matches!(labels[k], Some(ClusterLabel::Cluster(_)))
                            }));
                        }
                    }
                }
            }
        }

        let labels = labels
            .into_iter()
            .map(|l| l.unwrap_or(ClusterLabel::Noise))
            .collect();
        (labels, core)
    }
}

impl AnomalyScorer for DensityScorer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Density
    }

    fn score(&self, matrix: &FeatureMatrix) -> StrategyOutput {
        let n = matrix.n_rows();
        if matrix.is_degenerate() {
            return StrategyOutput::neutral(self.kind(), n)
                .with_labels(vec![ClusterLabel::Cluster(0); n]);
        }

        let (labels, core) = self.cluster(matrix);
        let core_rows: Vec<usize> = (0..n).filter(|&i| core[i]).collect();

        let scores = if core_rows.is_empty() {
            vec![1.0; n]
        } else {
            let distances: Vec<f64> = (0..n)
                .map(|i| {
                    core_rows
                        .iter()
                        .map(|&c| euclidean(matrix.row(i), matrix.row(c)))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let max = distances.iter().copied().fold(0.0, f64::max);
            distances
                .into_iter()
                .map(|d| if max > 0.0 { d / max } else { 0.0 })
                .collect()
        };

        let flagged: Vec<bool> = labels.iter().map(ClusterLabel::is_noise).collect();
        let clusters = labels
            .iter()
            .filter_map(|l| match l {
                ClusterLabel::Cluster(id) => Some(*id),
                ClusterLabel::Noise => None,
            })
            .max()
            .map(|id| id + 1)
            .unwrap_or(0);
        info!(
            clusters,
            noise = flagged.iter().filter(|&&f| f).count(),
            core = core_rows.len(),
            "Density clustering complete"
        );

        StrategyOutput {
            kind: self.kind(),
            scores,
            flagged,
            labels: Some(labels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(points: &[(f64, f64)]) -> FeatureMatrix {
        FeatureMatrix {
            wallets: (0..points.len()).map(|i| format!("w{:03}", i)).collect(),
            columns: vec!["x".into(), "y".into()],
            rows: points.iter().map(|&(x, y)| vec![x, y]).collect(),
        }
    }

    fn scorer(eps: f64, min_pts: usize) -> DensityScorer {
        DensityScorer::new(DensityConfig {
            neighborhood_radius: eps,
            min_neighbors: min_pts,
        })
        .unwrap()
    }

    #[test]
    fn test_two_clusters_and_noise() {
        let m = matrix(&[
            (0.0, 0.0),
            (0.1, 0.0),
            (0.0, 0.1),
            (5.0, 5.0),
            (5.1, 5.0),
            (5.0, 5.1),
            (20.0, 20.0),
        ]);
        let out = scorer(0.5, 3).score(&m);
        let labels = out.labels.unwrap();

        assert_eq!(labels[0], ClusterLabel::Cluster(0));
        assert_eq!(labels[2], ClusterLabel::Cluster(0));
        assert_eq!(labels[3], ClusterLabel::Cluster(1));
        assert_eq!(labels[6], ClusterLabel::Noise);
        assert_eq!(out.flagged, vec![false, false, false, false, false, false, true]);

        // Core points sit at distance 0; the noise point is the farthest
        assert_eq!(out.scores[0], 0.0);
        assert!((out.scores[6] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_border_point_joins_first_cluster() {
        // Point 4 sits between two dense groups and is reachable from both
        let m = matrix(&[
            (0.0, 0.0),
            (0.0, 0.1),
            (0.0, 0.2),
            (0.0, 0.3),
            (0.0, 0.75),
            (0.0, 1.2),
            (0.0, 1.3),
            (0.0, 1.4),
            (0.0, 1.5),
        ]);
        let (labels, core) = scorer(0.5, 4).cluster(&m);
        assert!(core[3]);
        assert!(core[5]);
        assert!(!core[4]);
        assert_eq!(labels[4], ClusterLabel::Cluster(0));
        assert_eq!(labels[8], ClusterLabel::Cluster(1));
    }

    #[test]
    fn test_no_core_points_all_noise() {
        let m = matrix(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let out = scorer(1.0, 2).score(&m);
        assert!(out.flagged.iter().all(|&f| f));
        assert!(out.scores.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_degenerate_matrix_is_neutral() {
        let m = FeatureMatrix {
            wallets: vec!["a".into(), "b".into()],
            columns: vec![],
            rows: vec![vec![], vec![]],
        };
        let out = scorer(1.0, 5).score(&m);
        assert_eq!(out.scores, vec![0.0, 0.0]);
        assert!(out.flagged.iter().all(|&f| !f));
    }

    #[test]
    fn test_invalid_config() {
        assert!(DensityScorer::new(DensityConfig {
            neighborhood_radius: 0.0,
            min_neighbors: 3
        })
        .is_err());
        assert!(DensityScorer::new(DensityConfig {
            neighborhood_radius: 1.0,
            min_neighbors: 0
        })
        .is_err());
    }

    #[test]
    fn test_cluster_label_text() {
        assert_eq!(ClusterLabel::Noise.to_string(), "noise");
        assert_eq!("3".parse::<ClusterLabel>().unwrap(), ClusterLabel::Cluster(3));
        assert!("x".parse::<ClusterLabel>().is_err());
    }
}
