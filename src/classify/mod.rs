//! Market title classification
//!
//! Titles are matched against an ordered list of [`TitleRule`]s; the first
//! rule that matches decides the classification. Rules come from
//! configuration, so adding one never touches the feature builder or the
//! post-filter, which only read [`TitleClassification`].

pub mod rules;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{Error, Result};
use crate::export::LIST_SEPARATOR;

pub use rules::{default_rules, PatternKind, TitleRule};

/// Result of classifying one title
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleClassification {
    pub is_earnings_market: bool,
    /// Upper-cased ticker captured by the matching rule
    pub ticker_tag: Option<String>,
    /// Topic tag of the matching rule
    pub topic: Option<String>,
    /// Name of the matching rule
    pub matched_pattern: Option<String>,
}

/// A rule with its patterns compiled
#[derive(Debug)]
struct CompiledRule {
    rule: TitleRule,
    primary: Regex,
    requires: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl CompiledRule {
    fn compile(rule: &TitleRule) -> Result<Self> {
        let build = |pattern: &str| -> Result<Regex> {
            let source = match rule.kind {
                PatternKind::Regex => pattern.to_string(),
                PatternKind::Literal => regex::escape(pattern),
            };
            RegexBuilder::new(&source)
                .case_insensitive(rule.case_insensitive)
                .build()
                .map_err(|e| Error::InvalidRegex {
                    rule: rule.name.clone(),
                    message: e.to_string(),
                })
        };

        Ok(Self {
            primary: build(&rule.pattern)?,
            requires: rule.requires.iter().map(|p| build(p.as_str())).collect::<Result<_>>()?,
            excludes: rule.excludes.iter().map(|p| build(p.as_str())).collect::<Result<_>>()?,
            rule: rule.clone(),
        })
    }

    /// Returns the ticker capture (possibly None) when the rule matches
    fn apply(&self, title: &str) -> Option<Option<String>> {
        let caps = self.primary.captures(title)?;
        if !self.requires.iter().all(|r| r.is_match(title)) {
            return None;
        }
        if self.excludes.iter().any(|r| r.is_match(title)) {
            return None;
        }
        let ticker = caps
            .name("ticker")
            .map(|m| m.as_str().trim().replace(LIST_SEPARATOR, "").to_ascii_uppercase())
            .filter(|t| !t.is_empty());
        Some(ticker)
    }
}

/// Rule names and tags end up in `;`-joined export cells
fn check_list_safe(name: &'static str, value: &str) -> Result<()> {
    if value.contains(LIST_SEPARATOR) {
        return Err(Error::invalid(
            name,
            format!("`{}` must not contain `{}`", value, LIST_SEPARATOR),
        ));
    }
    Ok(())
}

/// Ordered first-match-wins title classifier
#[derive(Debug)]
pub struct TitleClassifier {
    rules: Vec<CompiledRule>,
}

impl TitleClassifier {
    /// Compile a rule list, failing on the first invalid pattern
    pub fn new(rules: &[TitleRule]) -> Result<Self> {
        for rule in rules {
            check_list_safe("classifier.rules.name", &rule.name)?;
            if let Some(tag) = &rule.tag {
                check_list_safe("classifier.rules.tag", tag)?;
            }
        }
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Classifier over [`default_rules`]
    pub fn with_default_rules() -> Result<Self> {
        Self::new(&default_rules())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify a single title
    pub fn classify(&self, title: &str) -> TitleClassification {
        for compiled in &self.rules {
            if let Some(ticker) = compiled.apply(title) {
                debug!(rule = %compiled.rule.name, title, "Title matched");
                return TitleClassification {
                    is_earnings_market: compiled.rule.earnings,
                    ticker_tag: ticker,
                    topic: compiled.rule.tag.clone(),
                    matched_pattern: Some(compiled.rule.name.clone()),
                };
            }
        }
        TitleClassification::default()
    }
}

/// Split a `|`-joined list of titles
///
/// Strips whitespace, straight and curly quotes and parentheses around each
/// part, drops empties and de-duplicates case-insensitively keeping the
/// first spelling.
pub fn split_titles(joined: &str) -> Vec<String> {
    const STRIP: &[char] = &[' ', '\t', '\n', '\r', '\u{201c}', '\u{201d}', '"', '\'', '(', ')'];

    let mut seen = HashSet::new();
    joined
        .split('|')
        .map(|part| part.trim_matches(STRIP))
        .filter(|part| !part.is_empty())
        .filter(|part| seen.insert(part.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TitleClassifier {
        TitleClassifier::with_default_rules().unwrap()
    }

    #[test]
    fn test_strict_earnings_title() {
        let c = classifier().classify("Will Oklo (OKLO) beat quarterly earnings?");
        assert!(c.is_earnings_market);
        assert_eq!(c.ticker_tag.as_deref(), Some("OKLO"));
        assert_eq!(c.matched_pattern.as_deref(), Some("earnings-strict"));
        assert_eq!(c.topic.as_deref(), Some("earnings"));
    }

    #[test]
    fn test_loose_earnings_title() {
        let c = classifier().classify("Q3: will Nvidia (nvda) beat quarterly earnings this week");
        assert!(c.is_earnings_market);
        assert_eq!(c.ticker_tag.as_deref(), Some("NVDA"));
        assert_eq!(c.matched_pattern.as_deref(), Some("earnings-loose"));
    }

    #[test]
    fn test_crypto_price_market() {
        let c = classifier().classify("Bitcoin above $100k on Friday?");
        assert!(!c.is_earnings_market);
        assert_eq!(c.topic.as_deref(), Some("crypto"));
        assert_eq!(c.ticker_tag, None);

        // Speech markets mentioning a coin are excluded
        let c = classifier().classify("Will Trump say Bitcoin above 100k?");
        assert_eq!(c.matched_pattern, None);
    }

    #[test]
    fn test_no_match() {
        let c = classifier().classify("Will the Lakers win on Friday?");
        assert_eq!(c, TitleClassification::default());
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            TitleRule {
                name: "first".into(),
                pattern: "apple".into(),
                kind: PatternKind::Literal,
                requires: vec![],
                excludes: vec![],
                case_insensitive: true,
                earnings: false,
                tag: Some("product".into()),
            },
            TitleRule {
                name: "second".into(),
                pattern: r"(?P<ticker>AAPL)".into(),
                kind: PatternKind::Regex,
                requires: vec![],
                excludes: vec![],
                case_insensitive: false,
                earnings: true,
                tag: None,
            },
        ];
        let classifier = TitleClassifier::new(&rules).unwrap();
        let c = classifier.classify("Will Apple (AAPL) ship a foldable?");
        assert_eq!(c.matched_pattern.as_deref(), Some("first"));
        assert!(!c.is_earnings_market);
    }

    #[test]
    fn test_literal_patterns_are_escaped() {
        let rules = vec![TitleRule {
            name: "dollar".into(),
            pattern: "$100".into(),
            kind: PatternKind::Literal,
            requires: vec![],
            excludes: vec![],
            case_insensitive: true,
            earnings: false,
            tag: None,
        }];
        let classifier = TitleClassifier::new(&rules).unwrap();
        assert!(classifier.classify("ETH to $100?").matched_pattern.is_some());
        assert!(classifier.classify("ETH to 100?").matched_pattern.is_none());
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let mut rules = default_rules();
        rules[1].pattern = "(unclosed".into();
        let err = TitleClassifier::new(&rules).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("earnings-loose"));
    }

    #[test]
    fn test_list_separator_in_name_or_tag_rejected() {
        let mut rules = default_rules();
        rules[0].name = "rain;weather".into();
        let err = TitleClassifier::new(&rules).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("rain;weather"));

        let mut rules = default_rules();
        rules[2].tag = Some("wx;climate".into());
        assert!(TitleClassifier::new(&rules).unwrap_err().is_config_error());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = classifier();
        let title = "Will Palantir (PLTR) beat quarterly earnings?";
        assert_eq!(classifier.classify(title), classifier.classify(title));
    }

    #[test]
    fn test_split_titles() {
        let titles = split_titles(" \u{201c}Will A win?\u{201d} | will a win? || (Will B win?) ");
        assert_eq!(titles, vec!["Will A win?".to_string(), "Will B win?".to_string()]);
        assert!(split_titles("   ").is_empty());
    }
}
