//! Ordered, data-driven rule tables.
//!
//! A [`RuleTable`] is a list of rows `(name, kind, matcher)` evaluated in
//! order against whitespace-normalized text; the first matching row wins.
//! New attack signatures or phrase families are added by appending rows,
//! never by editing control flow.
//!
//! Rule evaluation is fail-open: a row whose matcher cannot be evaluated
//! (a pattern that failed to compile, a custom matcher returning an error)
//! produces a [`ClassifierFault`], which is logged and skipped.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ClassifierFault;

/// Signature of a custom matcher function.
pub type MatchFn = dyn Fn(&str) -> Result<bool, ClassifierFault> + Send + Sync;

/// How a rule decides whether text matches.
#[derive(Clone)]
pub enum Matcher {
    /// Case-insensitive regular expression.
    Pattern(Regex),
    /// A pattern that failed to compile. Always faults when evaluated.
    Invalid {
        /// The source pattern.
        pattern: String,
        /// Compiler error message.
        reason: String,
    },
    /// Arbitrary predicate.
    Custom(Arc<MatchFn>),
}

impl Matcher {
    /// Compile a case-insensitive pattern.
    ///
    /// Compilation errors are kept inside the matcher instead of being
    /// returned, so one bad row never prevents a table from being built.
    #[must_use]
    pub fn pattern(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => Self::Pattern(re),
            Err(e) => Self::Invalid {
                pattern: pattern.to_owned(),
                reason: e.to_string(),
            },
        }
    }

    /// Wrap a custom predicate.
    pub fn custom(f: impl Fn(&str) -> Result<bool, ClassifierFault> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate against `text`, returning the matched fragment when known.
    fn find(&self, rule: &str, text: &str) -> Result<Option<String>, ClassifierFault> {
        match self {
            Self::Pattern(re) => Ok(re.find(text).map(|m| m.as_str().to_owned())),
            Self::Invalid { reason, .. } => Err(ClassifierFault::new(rule, reason.clone())),
            Self::Custom(f) => Ok(f(text)?.then(String::new)),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Invalid { pattern, reason } => f
                .debug_struct("Invalid")
                .field("pattern", pattern)
                .field("reason", reason)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One row of a rule table.
#[derive(Debug, Clone)]
pub struct Rule<K> {
    name: String,
    kind: K,
    matcher: Matcher,
}

impl<K: Copy> Rule<K> {
    /// Create a rule from an existing matcher.
    pub fn new(name: impl Into<String>, kind: K, matcher: Matcher) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher,
        }
    }

    /// Rule identifier, retained in results for audit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What this rule detects.
    #[must_use]
    pub const fn kind(&self) -> K {
        self.kind
    }

    /// Returns `true` if the rule can never be evaluated.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self.matcher, Matcher::Invalid { .. })
    }
}

/// A row matched by [`RuleTable::first_match`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch<K> {
    /// Name of the matching rule.
    pub rule: String,
    /// Kind of the matching rule.
    pub kind: K,
    /// The matched text, empty for custom matchers.
    pub matched: String,
}

/// An ordered list of rules where the first match wins.
#[derive(Debug, Clone)]
pub struct RuleTable<K> {
    rules: Vec<Rule<K>>,
}

impl<K> Default for RuleTable<K> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<K: Copy + fmt::Debug> RuleTable<K> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern row.
    #[must_use]
    pub fn rule(mut self, name: impl Into<String>, kind: K, pattern: &str) -> Self {
        self.push(Rule::new(name, kind, Matcher::pattern(pattern)));
        self
    }

    /// Append a row.
    pub fn push(&mut self, rule: Rule<K>) {
        self.rules.push(rule);
    }

    /// Append pattern rows described by configuration.
    pub fn extend_specs<'a>(&mut self, kind: K, specs: impl IntoIterator<Item = &'a RuleSpec>) {
        for spec in specs {
            self.push(Rule::new(&spec.name, kind, Matcher::pattern(&spec.pattern)));
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rows in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule<K>] {
        &self.rules
    }

    /// Evaluate rows in order and return the first match.
    ///
    /// Runs of whitespace in `text` are collapsed to a single space first.
    /// Faulting rows are logged and skipped.
    #[must_use]
    pub fn first_match(&self, text: &str) -> Option<RuleMatch<K>> {
        let normalized = normalize_whitespace(text);
        for rule in &self.rules {
            match rule.matcher.find(&rule.name, &normalized) {
                Ok(Some(matched)) => {
                    return Some(RuleMatch {
                        rule: rule.name.clone(),
                        kind: rule.kind,
                        matched,
                    });
                }
                Ok(None) => {}
                Err(fault) => {
                    warn!(rule = %rule.name, kind = ?rule.kind, error = %fault, "classifier fault, treating rule as not matched");
                }
            }
        }
        None
    }
}

/// A configurable pattern row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule identifier.
    pub name: String,
    /// Case-insensitive regular expression.
    pub pattern: String,
}

impl RuleSpec {
    /// Create a rule spec.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Collapse every run of whitespace into one space and trim the ends.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Tag {
        A,
        B,
    }

    #[test]
    fn test_first_match_wins() {
        let table = RuleTable::new()
            .rule("first", Tag::A, r"\bhello\b")
            .rule("second", Tag::B, r"\bhello\s+there\b");

        let m = table.first_match("Hello there").unwrap();
        assert_eq!(m.rule, "first");
        assert_eq!(m.kind, Tag::A);
        assert_eq!(m.matched, "Hello");
    }

    #[test]
    fn test_whitespace_tolerant() {
        let table = RuleTable::new().rule("r", Tag::A, r"system prompt");
        assert!(table.first_match("your   SYSTEM\n\tprompt").is_some());
    }

    #[test]
    fn test_invalid_pattern_fails_open() {
        let table = RuleTable::new()
            .rule("broken", Tag::A, r"(unclosed")
            .rule("fine", Tag::B, r"unclosed");

        assert!(table.rules()[0].is_invalid());
        let m = table.first_match("an unclosed group").unwrap();
        assert_eq!(m.rule, "fine");
    }

    #[test]
    fn test_custom_matcher_fault_is_skipped() {
        let mut table = RuleTable::new();
        table.push(Rule::new(
            "explodes",
            Tag::A,
            Matcher::custom(|_| Err(ClassifierFault::new("explodes", "boom"))),
        ));
        assert!(table.first_match("anything").is_none());

        table.push(Rule::new("always", Tag::B, Matcher::custom(|_| Ok(true))));
        let m = table.first_match("anything").unwrap();
        assert_eq!(m.kind, Tag::B);
        assert!(m.matched.is_empty());
    }

    #[test]
    fn test_extend_specs() {
        let mut table = RuleTable::new();
        table.extend_specs(Tag::A, &[RuleSpec::new("pirate", r"\barr+\b")]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.first_match("ARRR matey").unwrap().rule, "pirate");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n b\t\tc "), "a b c");
    }
}
