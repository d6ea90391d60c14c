//! Reply screening: persona drift and verbosity.
//!
//! Runs after generation, before the reply is shown. Drift is checked first;
//! verbosity only matters when the reply is still in character, since a
//! drift correction is expected to shorten the reply anyway.

use tracing::debug;

use super::rules::{RuleSpec, RuleTable};
use super::{Category, ClassificationResult};

/// Built-in evaluator-voice table, in evaluation order.
const DRIFT_RULES: &[(&str, &str)] = &[
    (
        "report_heading",
        r"\b(?:feedback|evaluation|assessment|performance)\s+(?:report|summary)\b",
    ),
    (
        "score_reporting",
        r"\b(?:score|scored|rating|grade)\s*:?\s*\d+\s*(?:/|out\s+of)\s*\d+|\b(?:score|rating)\s*:\s*\d+",
    ),
    (
        "criteria_met",
        r"\b(?:criteria|criterion)\s+(?:(?:was|were|is|are|has\s+been|have\s+been)\s+)?(?:not\s+|partially\s+|fully\s+)?met\b|\bmet\s+(?:the\s+|all\s+|this\s+)?(?:criteria|criterion)\b|\brubric\b|:\s*(?:not\s+|partially\s+|fully\s+)?met\b",
    ),
    (
        "strengths_improvement",
        r"\b(?:areas?\s+(?:for|of)\s+(?:improvement|growth)|strengths?\s*:|you\s+could\s+improve|to\s+improve\s+your|you\s+did\s+(?:a\s+)?(?:great|good)\s+job|next\s+time,?\s+(?:try|consider))\b",
    ),
    (
        "evaluator_voice",
        r"\b(?:as\s+(?:an?\s+|your\s+)?(?:evaluator|assessor|grader|instructor)|motivational\s+interviewing\s+(?:skills|techniques)|your\s+(?:use\s+of\s+)?(?:reflective\s+listening|open-ended\s+questions|affirmations))\b",
    ),
];

/// Fragments shorter than this are not counted as sentences.
const MIN_SENTENCE_CHARS: usize = 10;

/// Screens a generated reply before it is shown to the user.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    drift: RuleTable<Category>,
    max_sentences: usize,
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseClassifier {
    /// Default sentence limit for a persona reply.
    pub const DEFAULT_MAX_SENTENCES: usize = 3;

    /// Create a classifier with the built-in drift table.
    #[must_use]
    pub fn new() -> Self {
        let drift = DRIFT_RULES
            .iter()
            .fold(RuleTable::new(), |table, (name, pattern)| {
                table.rule(*name, Category::PersonaDrift, pattern)
            });
        Self {
            drift,
            max_sentences: Self::DEFAULT_MAX_SENTENCES,
        }
    }

    /// Set the sentence limit.
    #[must_use]
    pub const fn with_max_sentences(mut self, max_sentences: usize) -> Self {
        self.max_sentences = max_sentences;
        self
    }

    /// Append drift rows after the built-in ones.
    #[must_use]
    pub fn with_drift_rules<'a>(mut self, specs: impl IntoIterator<Item = &'a RuleSpec>) -> Self {
        self.drift.extend_specs(Category::PersonaDrift, specs);
        self
    }

    /// The drift rule table.
    #[must_use]
    pub const fn drift_rules(&self) -> &RuleTable<Category> {
        &self.drift
    }

    /// Check `reply` for evaluator-voice language.
    #[must_use]
    pub fn classify_persona_drift(&self, reply: &str) -> ClassificationResult {
        self.drift
            .first_match(reply)
            .map_or(ClassificationResult::clear(Category::PersonaDrift), Into::into)
    }

    /// Returns `true` if `reply` has more sentences than allowed.
    #[must_use]
    pub fn classify_verbosity(&self, reply: &str) -> bool {
        count_sentences(reply) > self.max_sentences
    }

    /// Screen `reply`, drift before verbosity.
    #[must_use]
    pub fn classify(&self, reply: &str) -> Option<ClassificationResult> {
        if let Some(result) = self.classify_persona_drift(reply).into_flagged() {
            debug!(rule = ?result.matched_rule, "persona drift detected");
            return Some(result);
        }
        self.classify_verbosity(reply).then(|| {
            debug!(max = self.max_sentences, "verbose reply detected");
            ClassificationResult::flagged(Category::Verbosity, "sentence_limit")
        })
    }
}

/// Count sentences, ignoring fragments shorter than ten characters.
///
/// Short fragments are mostly abbreviation noise ("Dr.", "e.g.").
#[must_use]
pub fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|fragment| fragment.trim().chars().count() >= MIN_SENTENCE_CHARS)
        .count()
}
