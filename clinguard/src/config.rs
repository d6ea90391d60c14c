//! Guardrail configuration.
//!
//! Loaded from a JSON file; every field has a default, so an empty object
//! `{}` is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::closure::EndOfTurnDetector;
use crate::error::{ConfigError, ConfigResult};
use crate::guardrail::{
    CorrectiveMessageFactory, InputClassifier, ResponseClassifier, RuleSpec,
};

/// Reply shown when the model collaborator fails or times out.
pub const DEFAULT_FALLBACK_REPLY: &str = "Sorry, I lost my train of thought for a second. Could you say that again?";

/// Tunable limits and extra rule rows for the guardrail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Inputs with fewer words are never screened as off-topic.
    pub min_words: usize,
    /// Replies with more sentences are regenerated once.
    pub max_sentences: usize,
    /// User turn count at which feedback is offered regardless of wording.
    pub feedback_turn_threshold: usize,
    /// Timeout for one model call, in seconds.
    pub model_timeout_secs: u64,
    /// Persona-appropriate reply used when the model call fails.
    pub fallback_reply: String,
    /// Extra words marking input as unrelated to the scenario.
    pub extra_unrelated_topics: Vec<String>,
    /// Extra injection rows, evaluated after the built-in ones.
    pub extra_injection_rules: Vec<RuleSpec>,
    /// Extra persona-drift rows, evaluated after the built-in ones.
    pub extra_drift_rules: Vec<RuleSpec>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_words: InputClassifier::DEFAULT_MIN_WORDS,
            max_sentences: ResponseClassifier::DEFAULT_MAX_SENTENCES,
            feedback_turn_threshold: EndOfTurnDetector::DEFAULT_FEEDBACK_TURN_THRESHOLD,
            model_timeout_secs: 30,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_owned(),
            extra_unrelated_topics: Vec::new(),
            extra_injection_rules: Vec::new(),
            extra_drift_rules: Vec::new(),
        }
    }
}

impl GuardConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`validate`](Self::validate).
    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "loaded guard config");
        Ok(config)
    }

    /// Check that limits are usable.
    ///
    /// Rule patterns are not compiled here: an invalid pattern is a
    /// classifier fault at evaluation time, not a load error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero limits, an empty fallback
    /// reply, or a rule row without a name.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_sentences == 0 {
            return Err(ConfigError::invalid("max_sentences must be at least 1"));
        }
        if self.feedback_turn_threshold == 0 {
            return Err(ConfigError::invalid("feedback_turn_threshold must be at least 1"));
        }
        if self.model_timeout_secs == 0 {
            return Err(ConfigError::invalid("model_timeout_secs must be at least 1"));
        }
        if self.fallback_reply.trim().is_empty() {
            return Err(ConfigError::invalid("fallback_reply must not be empty"));
        }
        if let Some(spec) = self
            .extra_injection_rules
            .iter()
            .chain(&self.extra_drift_rules)
            .find(|spec| spec.name.trim().is_empty())
        {
            return Err(ConfigError::invalid(format!(
                "rule with pattern '{}' has no name",
                spec.pattern
            )));
        }
        Ok(())
    }

    /// Model call timeout.
    #[must_use]
    pub const fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Build the input classifier described by this configuration.
    #[must_use]
    pub fn input_classifier(&self) -> InputClassifier {
        InputClassifier::new()
            .with_min_words(self.min_words)
            .with_unrelated_topics(&self.extra_unrelated_topics)
            .with_injection_rules(&self.extra_injection_rules)
    }

    /// Build the response classifier described by this configuration.
    #[must_use]
    pub fn response_classifier(&self) -> ResponseClassifier {
        ResponseClassifier::new()
            .with_max_sentences(self.max_sentences)
            .with_drift_rules(&self.extra_drift_rules)
    }

    /// Build the corrective message factory described by this configuration.
    #[must_use]
    pub const fn corrective_factory(&self) -> CorrectiveMessageFactory {
        CorrectiveMessageFactory::new(self.max_sentences)
    }

    /// Build the end-of-turn detector described by this configuration.
    #[must_use]
    pub fn end_of_turn_detector(&self) -> EndOfTurnDetector {
        EndOfTurnDetector::new().with_feedback_turn_threshold(self.feedback_turn_threshold)
    }
}
