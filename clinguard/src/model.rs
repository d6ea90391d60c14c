//! The model-generation collaborator.
//!
//! The guardrail never talks to an LLM directly; it builds a
//! [`GenerateRequest`] and hands it to a [`ModelCollaborator`]. A corrective
//! directive travels only as the request's `directive` field and is dropped
//! with the request.

use async_trait::async_trait;

use crate::error::ModelResult;
use crate::guardrail::CorrectiveDirective;
use crate::transcript::Turn;

/// Everything needed to produce one persona reply.
#[derive(Debug)]
pub struct GenerateRequest<'a> {
    /// Persona instructions from the domain profile.
    pub persona_prompt: &'a str,
    /// Topic restriction for the scenario.
    pub domain_context: &'a str,
    /// Conversation so far, ending with the pending user turn.
    pub transcript: &'a [Turn],
    /// Single-use correction for a regeneration call.
    pub directive: Option<CorrectiveDirective>,
}

impl<'a> GenerateRequest<'a> {
    /// Create a request without a directive.
    #[must_use]
    pub const fn new(persona_prompt: &'a str, domain_context: &'a str, transcript: &'a [Turn]) -> Self {
        Self {
            persona_prompt,
            domain_context,
            transcript,
            directive: None,
        }
    }

    /// Attach a corrective directive, consuming it.
    #[must_use]
    pub fn with_directive(mut self, directive: CorrectiveDirective) -> Self {
        self.directive = Some(directive);
        self
    }
}

/// Produces persona replies.
///
/// Implementations may fail with a transport or response error; the
/// orchestrator applies its own timeout on top.
#[async_trait]
pub trait ModelCollaborator: Send + Sync {
    /// Generate the persona's next reply.
    async fn generate(&self, request: GenerateRequest<'_>) -> ModelResult<String>;
}
