//! Pattern matching and rule ranking
//!
//! Four pattern kinds are supported:
//! - `exact`: case-insensitive equality after trimming and collapsing whitespace
//! - `contains`: case-insensitive substring, `|` separates alternatives
//! - `wildcard`: `*` matches any run, `?` a single character, anchored
//! - `regex`: case-insensitive regular expression
//!
//! Compiled regexes (and wildcard translations) are memoized. An invalid
//! regex is a non-match, never a panic.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{PatternKind, Rule};

/// Literal length at which the specificity bonus saturates
const LITERAL_SATURATION: usize = 30;

/// Result of evaluating one pattern against one description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    pub specificity: f64,
}

/// A rule that matched, with its ranking numbers
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: Rule,
    pub specificity: f64,
    pub score: f64,
}

fn kind_weight(kind: PatternKind) -> f64 {
    match kind {
        PatternKind::Exact => 1.0,
        PatternKind::Contains => 0.85,
        PatternKind::Wildcard => 0.75,
        PatternKind::Regex => 0.7,
    }
}

/// Uppercase, trim, collapse internal whitespace
fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Number of characters in a pattern that must appear verbatim
fn literal_len(pattern: &str, kind: PatternKind) -> usize {
    match kind {
        PatternKind::Exact => normalize_text(pattern).chars().count(),
        PatternKind::Contains => pattern
            .split('|')
            .map(|alt| alt.trim().chars().count())
            .max()
            .unwrap_or(0),
        PatternKind::Wildcard => pattern.chars().filter(|c| *c != '*' && *c != '?').count(),
        PatternKind::Regex => {
            let mut count = 0;
            let mut escaped = false;
            for c in pattern.chars() {
                if escaped {
                    // \d, \w, \s and friends are classes, not literals
                    if !c.is_ascii_alphanumeric() {
                        count += 1;
                    }
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c.is_alphanumeric() || c == ' ' {
                    count += 1;
                }
            }
            count
        }
    }
}

/// Specificity in [0, 1] for a pattern
pub fn specificity(pattern: &str, kind: PatternKind) -> f64 {
    let literal = literal_len(pattern, kind).min(LITERAL_SATURATION) as f64;
    kind_weight(kind) * 0.8 + 0.2 * literal / LITERAL_SATURATION as f64
}

/// Small bonus for rules with a track record, capped at 0.15
pub fn usage_bonus(usage_count: i64) -> f64 {
    let uses = usage_count.max(0) as f64;
    ((uses + 1.0).log10() / 10.0).min(0.15)
}

/// Composite ranking score used to break specificity ties
pub fn composite_score(specificity: f64, confidence: f64, usage_count: i64) -> f64 {
    specificity * 0.4 + confidence * 0.5 + usage_bonus(usage_count) * 0.1
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    for c in pattern.trim().chars() {
        match c {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

fn compile(source: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(source).case_insensitive(true).build()
}

/// Reject patterns that could never be evaluated
pub fn validate_pattern_syntax(pattern: &str, kind: PatternKind) -> Result<()> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidData("Pattern cannot be empty".into()));
    }
    match kind {
        PatternKind::Contains => {
            if trimmed.split('|').all(|alt| alt.trim().is_empty()) {
                return Err(Error::InvalidData(format!(
                    "Pattern '{}' has no non-empty alternative",
                    pattern
                )));
            }
        }
        PatternKind::Wildcard => {
            if trimmed.chars().all(|c| c == '*' || c == '?') {
                return Err(Error::InvalidData(format!(
                    "Wildcard pattern '{}' has no literal part",
                    pattern
                )));
            }
            compile(&wildcard_to_regex(trimmed))?;
        }
        PatternKind::Regex => {
            compile(trimmed)?;
        }
        PatternKind::Exact => {}
    }
    Ok(())
}

/// Evaluates patterns against descriptions
///
/// Holds a memo of compiled expressions keyed by kind and pattern text.
/// `None` marks a pattern that failed to compile, so it is only logged once.
#[derive(Default)]
pub struct PatternMatcher {
    compiled: RwLock<HashMap<(PatternKind, String), Option<Regex>>>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn regex_for(&self, pattern: &str, kind: PatternKind) -> Option<Regex> {
        let key = (kind, pattern.to_string());
        if let Some(cached) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return cached.clone();
        }

        let source = match kind {
            PatternKind::Wildcard => wildcard_to_regex(pattern),
            _ => pattern.trim().to_string(),
        };
        let compiled = match compile(&source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %pattern, kind = %kind, "Invalid pattern, treating as non-match: {}", e);
                None
            }
        };

        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, compiled.clone());
        compiled
    }

    /// Does `pattern` match `description`, and how specific is it?
    pub fn evaluate(&self, pattern: &str, kind: PatternKind, description: &str) -> MatchOutcome {
        let matched = match kind {
            PatternKind::Exact => {
                let p = normalize_text(pattern);
                !p.is_empty() && p == normalize_text(description)
            }
            PatternKind::Contains => {
                let haystack = description.to_uppercase();
                pattern
                    .split('|')
                    .map(|alt| alt.trim().to_uppercase())
                    .filter(|alt| !alt.is_empty())
                    .any(|alt| haystack.contains(&alt))
            }
            PatternKind::Wildcard | PatternKind::Regex => {
                if pattern.trim().is_empty() {
                    false
                } else {
                    self.regex_for(pattern, kind)
                        .is_some_and(|re| re.is_match(description.trim()))
                }
            }
        };

        MatchOutcome {
            matched,
            specificity: if matched { specificity(pattern, kind) } else { 0.0 },
        }
    }

    /// Evaluate all rules and return the matches, best first
    ///
    /// Rules below `min_confidence` are ignored. Ranking: specificity, then
    /// composite score, then lower id.
    pub fn rank_matches(&self, rules: &[Rule], description: &str, min_confidence: f64) -> Vec<RuleMatch> {
        let mut matches: Vec<RuleMatch> = rules
            .iter()
            .filter(|rule| rule.confidence >= min_confidence)
            .filter_map(|rule| {
                let outcome = self.evaluate(&rule.pattern, rule.pattern_kind, description);
                outcome.matched.then(|| RuleMatch {
                    rule: rule.clone(),
                    specificity: outcome.specificity,
                    score: composite_score(outcome.specificity, rule.confidence, rule.usage_count),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.specificity
                .total_cmp(&a.specificity)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.rule.id.cmp(&b.rule.id))
        });
        matches
    }

    /// Number of memoized expressions (including failed ones)
    pub fn compiled_count(&self) -> usize {
        self.compiled.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleSource, RuleStatus};
    use chrono::Utc;

    fn rule(id: i64, pattern: &str, kind: PatternKind, confidence: f64, usage: i64) -> Rule {
        Rule {
            id,
            tenant_id: "default".into(),
            pattern: pattern.into(),
            pattern_kind: kind,
            category_id: Some(1),
            confidence,
            active: true,
            usage_count: usage,
            status: RuleStatus::Active,
            source: RuleSource::Manual,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_exact_ignores_case_and_spacing() {
        let m = PatternMatcher::new();
        assert!(m.evaluate("uber trip", PatternKind::Exact, "  UBER   TRIP ").matched);
        assert!(!m.evaluate("uber trip", PatternKind::Exact, "UBER TRIP HELP").matched);
    }

    #[test]
    fn test_contains_with_alternatives() {
        let m = PatternMatcher::new();
        assert!(m.evaluate("UBER", PatternKind::Contains, "DEBITO UBER CORRIDA 25.30").matched);
        assert!(m.evaluate("99POP|uber", PatternKind::Contains, "pag uber *trip").matched);
        assert!(!m.evaluate("IFOOD|RAPPI", PatternKind::Contains, "PAG UBER").matched);
        assert!(!m.evaluate(" | ", PatternKind::Contains, "anything").matched);
    }

    #[test]
    fn test_wildcard_is_anchored_and_escapes_literals() {
        let m = PatternMatcher::new();
        assert!(m.evaluate("PIX*PADARIA", PatternKind::Wildcard, "pix enviado padaria").matched);
        assert!(!m.evaluate("PIX*PADARIA", PatternKind::Wildcard, "pix padaria central").matched);
        assert!(m.evaluate("TARIFA ?", PatternKind::Wildcard, "TARIFA X").matched);
        assert!(!m.evaluate("TARIFA ?", PatternKind::Wildcard, "TARIFA XY").matched);
        // The dot is literal, not "any character"
        assert!(!m.evaluate("A.B*", PatternKind::Wildcard, "AXB123").matched);
        assert!(m.evaluate("A.B*", PatternKind::Wildcard, "A.B123").matched);
    }

    #[test]
    fn test_invalid_regex_is_non_match() {
        let m = PatternMatcher::new();
        let outcome = m.evaluate("([unclosed", PatternKind::Regex, "anything");
        assert!(!outcome.matched);
        assert_eq!(outcome.specificity, 0.0);
        // Memoized as failed, evaluated again without panicking
        assert!(!m.evaluate("([unclosed", PatternKind::Regex, "anything").matched);
        assert_eq!(m.compiled_count(), 1);
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        let m = PatternMatcher::new();
        assert!(m.evaluate(r"^sispag\s+\w+", PatternKind::Regex, "SISPAG FORNECEDORES 123").matched);
    }

    #[test]
    fn test_specificity_ordering_at_equal_literal_length() {
        let exact = specificity("NETFLIX", PatternKind::Exact);
        let contains = specificity("NETFLIX", PatternKind::Contains);
        let wildcard = specificity("NETFLIX*", PatternKind::Wildcard);
        let regex = specificity("NETFLIX.*", PatternKind::Regex);
        assert!(exact > contains);
        assert!(contains > wildcard);
        assert!(wildcard >= regex);
        assert!(specificity("NETFLIX.COM BR", PatternKind::Contains) > contains);
        assert!(exact <= 1.0 && regex >= 0.0);
    }

    #[test]
    fn test_validate_pattern_syntax() {
        assert!(validate_pattern_syntax("UBER", PatternKind::Contains).is_ok());
        assert!(validate_pattern_syntax("   ", PatternKind::Exact).is_err());
        assert!(validate_pattern_syntax("**", PatternKind::Wildcard).is_err());
        assert!(validate_pattern_syntax("(a", PatternKind::Regex).is_err());
        assert!(validate_pattern_syntax("PIX*(LOJA", PatternKind::Wildcard).is_ok());
    }

    #[test]
    fn test_rank_matches_prefers_specific_then_score() {
        let m = PatternMatcher::new();
        let rules = vec![
            rule(1, "UBER", PatternKind::Contains, 0.9, 0),
            rule(2, "DEBITO UBER CORRIDA 25.30", PatternKind::Exact, 0.8, 0),
            rule(3, "UBER", PatternKind::Contains, 0.95, 100),
            rule(4, "UB.*", PatternKind::Regex, 0.99, 0),
            rule(5, "UBER", PatternKind::Contains, 0.3, 0),
        ];

        let ranked = m.rank_matches(&rules, "DEBITO UBER CORRIDA 25.30", 0.5);
        let ids: Vec<i64> = ranked.iter().map(|r| r.rule.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_rank_matches_ties_break_on_lower_id() {
        let m = PatternMatcher::new();
        let rules = vec![
            rule(9, "NETFLIX", PatternKind::Contains, 0.9, 0),
            rule(4, "NETFLIX", PatternKind::Contains, 0.9, 0),
        ];
        let ranked = m.rank_matches(&rules, "NETFLIX.COM", 0.5);
        assert_eq!(ranked[0].rule.id, 4);
    }

    #[test]
    fn test_usage_bonus_is_capped() {
        assert_eq!(usage_bonus(0), 0.0);
        assert!((usage_bonus(9) - 0.1).abs() < 1e-9);
        assert_eq!(usage_bonus(1_000_000), 0.15);
    }
}
