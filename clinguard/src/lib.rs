//! Clinguard is a conversation guardrail for clinical roleplay training.
//!
//! A trainee talks to a simulated patient driven by an LLM. Clinguard sits
//! between the two and, for every turn:
//!
//! - screens the trainee's input for prompt injection and off-topic requests,
//!   answering those with a fixed redirect instead of calling the model;
//! - screens the model's reply for persona drift and verbosity, issuing at
//!   most one regeneration with a corrective directive;
//! - tracks whether the conversation has reached a natural end so feedback
//!   can be offered.
//!
//! The entry point is [`GuardrailOrchestrator`]; models plug in through
//! [`ModelCollaborator`] and transcripts persist through [`TranscriptStore`].

pub mod closure;
pub mod config;
pub mod domain;
pub mod error;
pub mod guardrail;
pub mod model;
pub mod orchestrator;
pub mod prelude;
pub mod providers;
pub mod transcript;

pub use closure::{ConversationClosureState, EndOfTurnDetector, EndPhrase, EndPhraseKind};
pub use config::GuardConfig;
pub use domain::{DomainProfile, FileCatalog, MemoryCatalog, ScenarioCatalog};
pub use error::{GuardError, Result};
pub use guardrail::{
    Category, ClassificationResult, Correction, CorrectiveDirective, CorrectiveMessageFactory,
    InputClassifier, ResponseClassifier,
};
pub use model::{GenerateRequest, ModelCollaborator};
pub use orchestrator::{GuardrailOrchestrator, Session, TurnOutcome, TurnState};
pub use transcript::{FileTranscriptStore, MemoryTranscriptStore, Speaker, TranscriptStore, Turn};
