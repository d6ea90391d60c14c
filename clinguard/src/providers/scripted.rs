//! Scripted model for offline sessions and tests.
//!
//! Replies are served from a queue in order; once the queue is empty the
//! default reply is repeated. Every call is recorded so callers can check
//! how many generations a turn issued and which directive each carried.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{ModelError, ModelResult};
use crate::model::{GenerateRequest, ModelCollaborator};
use crate::transcript::{Speaker, Turn};

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with a transport error.
    Fail(String),
    /// Never answer; only a timeout ends the call.
    Hang,
}

/// What the model saw on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// The transcript passed in, pending user turn included.
    pub transcript: Vec<Turn>,
    /// Directive text, if this was a regeneration.
    pub directive: Option<String>,
}

impl RecordedCall {
    /// Text of the last user turn in the transcript.
    #[must_use]
    pub fn last_user_text(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::User)
            .map(|t| t.text.as_str())
    }
}

/// A [`ModelCollaborator`] that plays back a script.
#[derive(Debug)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    default_reply: String,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    /// Create a model that always answers `default_reply` once the script runs out.
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply.
    #[must_use]
    pub fn then(self, reply: ScriptedReply) -> Self {
        self.push(reply);
        self
    }

    /// Queue a text reply.
    #[must_use]
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(ScriptedReply::Text(text.into()))
    }

    /// Queue a reply on a shared model.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ModelCollaborator for ScriptedModel {
    async fn generate(&self, request: GenerateRequest<'_>) -> ModelResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                transcript: request.transcript.to_vec(),
                directive: request.directive.as_ref().map(|d| d.text().to_owned()),
            });

        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(reason)) => Err(ModelError::transport(reason)),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Ok(self.default_reply.clone()),
        }
    }
}
