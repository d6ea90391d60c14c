//! Corrective messages built from flagged classifications.
//!
//! Input-side categories resolve to a redirect line shown to the user in
//! place of a model reply. Output-side categories resolve to a
//! [`CorrectiveDirective`]: an instruction addressed to the model and
//! attached to exactly one regeneration call.
//!
//! Directive text is fixed per category. It never quotes the user's input or
//! the rejected reply, so an attack payload is not replayed to the model.

use std::fmt;

use super::{Category, ClassificationResult};
use crate::domain::DomainProfile;

const DRIFT_DIRECTIVE: &str = "Stay in character as the patient. Do not evaluate, score, or give \
     feedback on the conversation. Reply only as the patient would, in one to three short sentences.";

/// An ephemeral instruction for one regeneration call.
///
/// Not `Clone` and not `Serialize`. It is moved into a single model request
/// and dropped with it.
#[derive(Debug, PartialEq, Eq)]
pub struct CorrectiveDirective {
    category: Category,
    text: String,
}

impl CorrectiveDirective {
    /// The category this directive corrects.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// The instruction text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CorrectiveDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// What the orchestrator does about a flagged classification.
#[derive(Debug, PartialEq, Eq)]
pub enum Correction {
    /// Show this line to the user instead of calling the model.
    Redirect(String),
    /// Regenerate the reply once with this directive attached.
    Regenerate(CorrectiveDirective),
}

/// Builds one correction per flagged category.
#[derive(Debug, Clone, Copy)]
pub struct CorrectiveMessageFactory {
    max_sentences: usize,
}

impl Default for CorrectiveMessageFactory {
    fn default() -> Self {
        Self::new(crate::guardrail::ResponseClassifier::DEFAULT_MAX_SENTENCES)
    }
}

impl CorrectiveMessageFactory {
    /// Create a factory whose verbosity directive quotes `max_sentences`.
    #[must_use]
    pub const fn new(max_sentences: usize) -> Self {
        Self { max_sentences }
    }

    /// Build the correction for a flagged `result` in `domain`.
    ///
    /// Input categories get [`redirect`](Self::redirect), reply categories
    /// get [`directive`](Self::directive).
    #[must_use]
    pub fn build(&self, result: &ClassificationResult, domain: &DomainProfile) -> Correction {
        if result.category.is_input() {
            Correction::Redirect(Self::redirect(domain))
        } else {
            Correction::Regenerate(self.directive(result))
        }
    }

    /// The regeneration directive for a flagged reply.
    ///
    /// Verbosity gets the length directive; any other flag gets the
    /// stay-in-character directive.
    #[must_use]
    pub fn directive(&self, result: &ClassificationResult) -> CorrectiveDirective {
        match result.category {
            Category::Verbosity => self.verbosity(),
            Category::PersonaDrift | Category::Injection | Category::OffTopic => Self::drift(),
        }
    }

    /// The fixed redirect line for `domain`.
    #[must_use]
    pub fn redirect(domain: &DomainProfile) -> String {
        format!(
            "I'm here to discuss {}. Is there something specific about that you'd like to talk about?",
            domain.domain_name
        )
    }

    /// Directive pulling the model back into the patient persona.
    #[must_use]
    pub fn drift() -> CorrectiveDirective {
        CorrectiveDirective {
            category: Category::PersonaDrift,
            text: DRIFT_DIRECTIVE.to_owned(),
        }
    }

    /// Directive asking the model for a shorter reply.
    #[must_use]
    pub fn verbosity(&self) -> CorrectiveDirective {
        CorrectiveDirective {
            category: Category::Verbosity,
            text: format!(
                "Your previous reply was too long. Answer again as the patient in no more than {} short sentences.",
                self.max_sentences
            ),
        }
    }

    /// Every directive text this factory can emit.
    ///
    /// Used to scan stored transcripts for leaked directives.
    #[must_use]
    pub fn directive_texts(&self) -> [String; 2] {
        [Self::drift().text, self.verbosity().text]
    }
}
