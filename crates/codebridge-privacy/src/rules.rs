//! PII detection rules.
//!
//! A rule set is an ordered list; earlier rules win when matches overlap.

use regex::Regex;

use crate::{PrivacyError, Result};

/// Built-in rules in precedence order.
const BUILTIN_RULES: &[(&str, &str)] = &[
    ("EMAIL", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    ("CREDIT_CARD", r"\b(?:\d[ -]?){12,18}\d\b"),
    ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
    (
        "PHONE",
        r"(?:\+\d{1,3}[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b",
    ),
    (
        "IP_ADDRESS",
        r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
    ),
];

#[derive(Debug, Clone)]
pub struct PiiRule {
    category: String,
    pattern: Regex,
}

impl PiiRule {
    pub fn new(category: &str, pattern: &str) -> Result<Self> {
        if !is_valid_category(category) {
            return Err(PrivacyError::InvalidCategory(category.to_string()));
        }
        let pattern = Regex::new(pattern).map_err(|source| PrivacyError::InvalidPattern {
            category: category.to_string(),
            source,
        })?;
        Ok(Self {
            category: category.to_string(),
            pattern,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

fn is_valid_category(category: &str) -> bool {
    let mut chars = category.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Clone)]
pub struct PiiRuleSet {
    rules: Vec<PiiRule>,
}

impl Default for PiiRuleSet {
    /// EMAIL, CREDIT_CARD, SSN, PHONE, IP_ADDRESS.
    fn default() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(category, pattern)| match PiiRule::new(category, pattern) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::error!("built-in PII rule {} rejected: {}", category, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }
}

impl PiiRuleSet {
    /// Empty builder; call `.with_builtins()` to start from the default rules.
    pub fn builder() -> PiiRuleSetBuilder {
        PiiRuleSetBuilder::default()
    }

    pub fn rules(&self) -> &[PiiRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PiiRuleSetBuilder {
    rules: Vec<PiiRule>,
    error: Option<PrivacyError>,
}

impl PiiRuleSetBuilder {
    pub fn with_builtins(mut self) -> Self {
        self.rules.extend(PiiRuleSet::default().rules);
        self
    }

    /// Append a rule. The first invalid rule is reported by `build()`.
    pub fn rule(mut self, category: &str, pattern: &str) -> Self {
        if self.error.is_none() {
            match PiiRule::new(category, pattern) {
                Ok(rule) => self.rules.push(rule),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn build(self) -> Result<PiiRuleSet> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(PiiRuleSet { rules: self.rules }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let set = PiiRuleSet::default();
        let cats: Vec<&str> = set.rules().iter().map(|r| r.category()).collect();
        assert_eq!(cats, ["EMAIL", "CREDIT_CARD", "SSN", "PHONE", "IP_ADDRESS"]);
    }

    #[test]
    fn test_builder_appends_custom_rule() {
        let set = PiiRuleSet::builder()
            .with_builtins()
            .rule("EMPLOYEE_ID", r"\bEMP-\d{6}\b")
            .build()
            .unwrap();
        assert_eq!(set.len(), 6);
        assert_eq!(set.rules()[5].category(), "EMPLOYEE_ID");
    }

    #[test]
    fn test_builder_rejects_bad_category_and_pattern() {
        assert!(matches!(
            PiiRuleSet::builder().rule("lower", "x").build(),
            Err(PrivacyError::InvalidCategory(_))
        ));
        assert!(matches!(
            PiiRuleSet::builder().rule("OK", "(unclosed").build(),
            Err(PrivacyError::InvalidPattern { .. })
        ));
    }
}
