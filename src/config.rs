//! Configuration loading and validation
//!
//! Layers, lowest first: serde defaults, the optional TOML file, then
//! `RADAR__SECTION__KEY` environment variables. Every threshold here is a
//! dataset-dependent starting point, not a calibrated constant.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classify::{default_rules, TitleClassifier, TitleRule};

// Re-export stage configs
pub use crate::export::{ExportConfig, InputConfig};
pub use crate::features::FeatureConfig;
pub use crate::rules::RulesConfig;
pub use crate::scoring::{DensityConfig, IsolationConfig, ScoringConfig, StrategyKind};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RADAR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Ordered title rules, first match wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<TitleRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RADAR__)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scoring.strategies")
                    .with_list_parse_key("export.filter.require_labels"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config
            .validate()
            .with_context(|| format!("Invalid configuration ({})", path.display()))?;

        Ok(config)
    }

    /// Validate every section; runs before any computation
    pub fn validate(&self) -> crate::error::Result<()> {
        self.input.validate()?;

        if self.classifier.rules.is_empty() {
            tracing::warn!("No title rules configured - no market will be classified as earnings");
        }
        // Compiling is the only reliable regex check
        TitleClassifier::new(&self.classifier.rules)?;

        if self.features.burst_window_secs < 0 {
            return Err(crate::error::Error::invalid(
                "features.burst_window_secs",
                "must not be negative",
            ));
        }

        self.scoring.validate()?;
        self.rules.validate()?;
        self.export.validate()?;
        Ok(())
    }

    /// Human-readable effective configuration
    pub fn display(&self) -> String {
        let rules: Vec<String> = self
            .classifier
            .rules
            .iter()
            .map(|r| {
                format!(
                    "    - {} ({:?}{}{})",
                    r.name,
                    r.kind,
                    if r.earnings { ", earnings" } else { "" },
                    r.tag
                        .as_deref()
                        .map(|t| format!(", tag={}", t))
                        .unwrap_or_default()
                )
            })
            .collect();
        let strategies: Vec<String> = self
            .scoring
            .active_strategies()
            .map(|s| s.to_string())
            .collect();

        format!(
            r#"Configuration:
  Input:
    path: {}
    delimiter: {:?}
  Classifier:
{}
  Features:
    burst_window: {}s
  Scoring:
    strategies: [{}]
    weights: density={} isolation={}
    density: radius={} min_neighbors={}
    isolation: trees={} subsample={} contamination={} seed={}
  Rules:
    concentrated_earnings_wins: {} (boost {})
    earnings_focused: {} (boost {})
    high_win_rate: {} (boost {})
    one_sided_flow: {} (boost {})
    multi_issuer_earnings: {}
    crypto_price_trader: {}
  Export:
    output: {}
    features_output: {}
    summary: {}
    top_n: {}
    earnings_only: {}
    min_final_score: {}
    require_labels: {:?}
"#,
            self.input.path.display(),
            self.input.delimiter,
            rules.join("\n"),
            self.features.burst_window_secs,
            strategies.join(", "),
            self.scoring.density_weight,
            self.scoring.isolation_weight,
            self.scoring.density.neighborhood_radius,
            self.scoring.density.min_neighbors,
            self.scoring.isolation.ensemble_size,
            self.scoring.isolation.subsample_size,
            self.scoring.isolation.contamination,
            self.scoring.isolation.random_seed,
            self.rules.concentrated_earnings_wins.enabled,
            self.rules.concentrated_earnings_wins.boost,
            self.rules.earnings_focused.enabled,
            self.rules.earnings_focused.boost,
            self.rules.high_win_rate.enabled,
            self.rules.high_win_rate.boost,
            self.rules.one_sided_flow.enabled,
            self.rules.one_sided_flow.boost,
            self.rules.multi_issuer_earnings.enabled,
            self.rules.crypto_price_trader.enabled,
            self.export.output.display(),
            self.export.features_output.display(),
            self.export
                .summary
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            self.export.top_n,
            self.export.filter.earnings_only,
            self.export
                .filter
                .min_final_score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            self.export.filter.require_labels,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::TopN;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.rules.len(), 3);
        assert_eq!(config.export.top_n, TopN::All);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scoring.isolation.random_seed, 42);
        assert_eq!(config.scoring.density.min_neighbors, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[scoring]
strategies = ["isolation"]

[scoring.isolation]
ensemble_size = 50
random_seed = 7

[[classifier.rules]]
name = "guidance"
pattern = "raise guidance"
kind = "literal"
earnings = true
tag = "earnings"

[export]
top_n = 25

[export.filter]
earnings_only = true
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scoring.strategies, vec![StrategyKind::Isolation]);
        assert_eq!(config.scoring.isolation.ensemble_size, 50);
        assert_eq!(config.scoring.isolation.random_seed, 7);
        // Unset keys keep their defaults
        assert_eq!(config.scoring.isolation.subsample_size, 256);
        assert_eq!(config.classifier.rules.len(), 1);
        assert!(config.classifier.rules[0].case_insensitive);
        assert_eq!(config.export.top_n, TopN::Count(25));
        assert!(config.export.filter.earnings_only);
    }

    #[test]
    fn test_invalid_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.toml");
        std::fs::write(
            &path,
            "[scoring.isolation]\ncontamination = 0.9\n",
        )
        .unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("contamination"));

        std::fs::write(
            &path,
            "[[classifier.rules]]\nname = \"broken\"\npattern = \"(unclosed\"\n",
        )
        .unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_rule_name_with_list_separator_rejected() {
        let mut config = Config::default();
        config.classifier.rules[0].name = "rain;weather".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("classifier.rules.name"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.scoring.density.neighborhood_radius = -1.0;
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = Config::default();
        config.export.top_n = TopN::Count(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rules.one_sided_flow.boost = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_lists_rules() {
        let text = Config::default().display();
        assert!(text.contains("earnings-strict"));
        assert!(text.contains("strategies: [density, isolation]"));
        assert!(text.contains("top_n: all"));
    }
}
