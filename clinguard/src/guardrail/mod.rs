//! Guardrail module: deterministic checks on user input and persona replies.
//!
//! Two classifiers run around every model call:
//!
//! - **[`InputClassifier`]** screens raw user text before any model call
//!   (prompt injection, off-topic requests). A flagged input never reaches
//!   the model.
//! - **[`ResponseClassifier`]** screens a generated reply before it is shown
//!   (evaluator-voice drift, verbosity). A flagged reply is regenerated once.
//!
//! A flagged [`ClassificationResult`] is turned into a [`Correction`] by the
//! [`CorrectiveMessageFactory`]: either a fixed redirect line shown to the
//! user, or a single-use [`CorrectiveDirective`] attached to one regeneration
//! call.
//!
//! All detection is pattern-based and lives in ordered [`RuleTable`]s, so
//! new signatures are added as rows rather than branches.

mod directive;
mod input;
mod output;
pub mod rules;

pub use directive::{Correction, CorrectiveDirective, CorrectiveMessageFactory};
pub use input::{InputClassifier, UNRELATED_TOPICS};
pub use output::{ResponseClassifier, count_sentences};
pub use rules::{Matcher, Rule, RuleMatch, RuleSpec, RuleTable};

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a classifier was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Attempt to extract configuration or reassign the persona's role.
    Injection,
    /// Request outside the scenario's clinical domain.
    OffTopic,
    /// Reply that abandons the persona for an evaluator voice.
    PersonaDrift,
    /// Reply longer than the allowed number of sentences.
    Verbosity,
}

impl Category {
    /// Stable identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Injection => "injection",
            Self::OffTopic => "off_topic",
            Self::PersonaDrift => "persona_drift",
            Self::Verbosity => "verbosity",
        }
    }

    /// Returns `true` for categories checked before the model call.
    #[must_use]
    pub const fn is_input(self) -> bool {
        matches!(self, Self::Injection | Self::OffTopic)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one classifier check.
///
/// Produced fresh for every call; never cached across turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Whether the check flagged the text.
    pub flagged: bool,
    /// Which check produced this result.
    pub category: Category,
    /// Identifier of the rule (or vocabulary word) that matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

impl ClassificationResult {
    /// A result that did not flag.
    #[must_use]
    pub const fn clear(category: Category) -> Self {
        Self {
            flagged: false,
            category,
            matched_rule: None,
        }
    }

    /// A flagged result attributed to `rule`.
    #[must_use]
    pub fn flagged(category: Category, rule: impl Into<String>) -> Self {
        Self {
            flagged: true,
            category,
            matched_rule: Some(rule.into()),
        }
    }

    /// Convert to `Some(self)` when flagged.
    #[must_use]
    pub fn into_flagged(self) -> Option<Self> {
        self.flagged.then_some(self)
    }
}

impl From<RuleMatch<Category>> for ClassificationResult {
    fn from(m: RuleMatch<Category>) -> Self {
        Self::flagged(m.kind, m.rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let clear = ClassificationResult::clear(Category::Verbosity);
        assert!(!clear.flagged);
        assert!(clear.clone().into_flagged().is_none());

        let hit = ClassificationResult::flagged(Category::Injection, "jailbreak");
        assert_eq!(hit.matched_rule.as_deref(), Some("jailbreak"));
        assert_eq!(hit.clone().into_flagged(), Some(hit));
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&Category::PersonaDrift).unwrap();
        assert_eq!(json, "\"persona_drift\"");
        assert!(Category::OffTopic.is_input());
        assert!(!Category::Verbosity.is_input());
    }
}
