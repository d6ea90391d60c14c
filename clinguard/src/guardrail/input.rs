//! Input screening: prompt injection and off-topic detection.
//!
//! Runs before any model call. A flagged input is answered with a redirect
//! line and never forwarded to the model.

use std::collections::BTreeSet;

use tracing::debug;

use super::rules::{RuleSpec, RuleTable};
use super::{Category, ClassificationResult};
use crate::domain::DomainProfile;

/// Words that mark a request as unrelated to any clinical scenario.
pub const UNRELATED_TOPICS: &[&str] = &[
    "recipe",
    "recipes",
    "cooking",
    "weather",
    "forecast",
    "football",
    "soccer",
    "basketball",
    "baseball",
    "sports",
    "movie",
    "movies",
    "netflix",
    "celebrity",
    "concert",
    "song",
    "lyrics",
    "stocks",
    "crypto",
    "bitcoin",
    "politics",
    "election",
    "vacation",
    "hotel",
    "restaurant",
    "homework",
    "javascript",
    "python",
    "programming",
    "videogame",
    "fortnite",
    "horoscope",
    "lottery",
    "poem",
];

/// Built-in injection table, in evaluation order.
const INJECTION_RULES: &[(&str, &str)] = &[
    (
        "ignore_instructions",
        r"\b(?:ignore|disregard|forget|override)\s+(?:(?:all|any)\s+)?(?:(?:of\s+)?(?:the|your|my)\s+)?(?:previous|prior|above|earlier|original|initial|system|your)\s+(?:instructions|prompts?|rules|directions|guidelines|programming)\b",
    ),
    (
        "reveal_instructions",
        r"\b(?:reveal|show|tell|give|print|repeat|display|share|what\s+(?:is|are|were))(?:\s+me)?\s+(?:your\s+(?:(?:system|initial|hidden|original|secret)\s+)?(?:prompt|instructions|directives)|your\s+(?:system|initial|hidden|original|secret)\s+(?:rules|guidelines)|the\s+(?:system|initial|hidden|original)\s+(?:prompt|instructions))\b",
    ),
    (
        "role_reassignment",
        r"\b(?:(?:you\s+are\s+now|you\s+will\s+now\s+be|from\s+now\s+on,?\s+you\s+(?:are|will\s+be|act\s+as|will\s+act\s+as))\s+(?:an?\s+|my\s+|the\s+)?(?:\w+\s+)?(?:assistant|ai|bot|chatbot|doctor|clinician|nurse|evaluator|grader|examiner|tutor|pirate|character|persona|narrator)|you\s+are\s+no\s+longer\s+(?:an?\s+|the\s+)?(?:patient|parent|playing|in\s+character|roleplaying|role-playing)|from\s+now\s+on,?\s+you\s+(?:will\s+)?(?:respond|answer|reply)\s+(?:only\s+)?as|pretend\s+(?:to\s+be|you\s+are)|role-?play\s+as|switch\s+roles|stop\s+being\s+(?:the\s+|a\s+)?patient|act\s+as\s+(?:an?\s+|my\s+|the\s+)?(?:doctor|clinician|nurse|assistant|ai|evaluator|grader|examiner|different|another))\b",
    ),
    (
        "jailbreak",
        r"\b(?:jail\s*break(?:ing)?|dan\s+mode|developer\s+mode|do\s+anything\s+now|unfiltered\s+mode|bypass\s+(?:your\s+)?(?:filters?|restrictions|rules|safety)|without\s+(?:any\s+)?(?:restrictions|filters|limitations))\b",
    ),
    (
        "meta_hypothetical",
        r"\b(?:what\s+if\s+you\s+(?:were|weren'?t|are|aren'?t)\s+(?:not\s+)?(?:an?\s+)?(?:ai|bot|chatbot|language\s+model|real\s+patient|actor)|hypothetically,?\s+if\s+you|are\s+you\s+(?:an?\s+)?(?:ai|bot|chatbot|language\s+model|llm|gpt)|break\s+character|out\s+of\s+character)\b",
    ),
    (
        "config_dump",
        r"\b(?:(?:dump|print|output|list|show|export)\s+(?:me\s+)?(?:your\s+|the\s+)?(?:config(?:uration)?|settings|parameters|persona(?:\s+(?:details|description|prompt))?|character\s+sheet|scenario\s+(?:details|script)|system\s+message)|system\s+prompt)\b",
    ),
];

/// Screens raw user text before any model call.
#[derive(Debug, Clone)]
pub struct InputClassifier {
    injection: RuleTable<Category>,
    unrelated_topics: BTreeSet<String>,
    min_words: usize,
}

impl Default for InputClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InputClassifier {
    /// Default minimum word count before off-topic screening applies.
    pub const DEFAULT_MIN_WORDS: usize = 3;

    /// Create a classifier with the built-in tables.
    #[must_use]
    pub fn new() -> Self {
        let injection = INJECTION_RULES
            .iter()
            .fold(RuleTable::new(), |table, (name, pattern)| {
                table.rule(*name, Category::Injection, pattern)
            });
        Self {
            injection,
            unrelated_topics: UNRELATED_TOPICS.iter().map(|w| (*w).to_owned()).collect(),
            min_words: Self::DEFAULT_MIN_WORDS,
        }
    }

    /// Set the minimum word count for off-topic screening.
    #[must_use]
    pub const fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }

    /// Append injection rows after the built-in ones.
    #[must_use]
    pub fn with_injection_rules<'a>(mut self, specs: impl IntoIterator<Item = &'a RuleSpec>) -> Self {
        self.injection.extend_specs(Category::Injection, specs);
        self
    }

    /// Add words to the unrelated-topic vocabulary.
    #[must_use]
    pub fn with_unrelated_topics<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unrelated_topics
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    /// The injection rule table.
    #[must_use]
    pub const fn injection_rules(&self) -> &RuleTable<Category> {
        &self.injection
    }

    /// Check `text` against the injection table; first match wins.
    #[must_use]
    pub fn classify_injection(&self, text: &str) -> ClassificationResult {
        self.injection
            .first_match(text)
            .map_or(ClassificationResult::clear(Category::Injection), Into::into)
    }

    /// Returns `true` if `text` is off-topic for a domain with `domain_keywords`.
    ///
    /// Short texts are never flagged. A domain keyword anywhere in the text
    /// (case-insensitive substring) rules out off-topic, even when an
    /// unrelated-topic word is also present.
    #[must_use]
    pub fn classify_off_topic(&self, text: &str, domain_keywords: &[String]) -> bool {
        self.off_topic_word(text, domain_keywords).is_some()
    }

    /// Screen `text` for the given domain, injection first.
    #[must_use]
    pub fn classify(&self, text: &str, domain: &DomainProfile) -> Option<ClassificationResult> {
        if let Some(result) = self.classify_injection(text).into_flagged() {
            debug!(rule = ?result.matched_rule, "injection detected");
            return Some(result);
        }
        self.off_topic_word(text, &domain.keywords).map(|word| {
            debug!(word = %word, domain = %domain.domain_name, "off-topic input detected");
            ClassificationResult::flagged(Category::OffTopic, word)
        })
    }

    fn off_topic_word(&self, text: &str, domain_keywords: &[String]) -> Option<String> {
        if text.split_whitespace().count() < self.min_words {
            return None;
        }

        let lowered = text.to_lowercase();
        let on_topic = domain_keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .any(|k| lowered.contains(&k.to_lowercase()));
        if on_topic {
            return None;
        }

        lowered
            .split(|c: char| !c.is_alphanumeric())
            .find(|word| self.unrelated_topics.contains(*word))
            .map(str::to_owned)
    }
}
