//! Commonly used types, for glob import.

pub use crate::closure::{ConversationClosureState, EndOfTurnDetector};
pub use crate::config::GuardConfig;
pub use crate::domain::{DomainProfile, FileCatalog, MemoryCatalog, ScenarioCatalog};
pub use crate::error::{GuardError, ModelError, Result};
pub use crate::guardrail::{Category, ClassificationResult, CorrectiveMessageFactory};
pub use crate::model::{GenerateRequest, ModelCollaborator};
pub use crate::orchestrator::{GuardrailOrchestrator, Session, TurnOutcome, TurnState};
pub use crate::providers::{OpenAIChatModel, ScriptedModel};
pub use crate::transcript::{FileTranscriptStore, MemoryTranscriptStore, TranscriptStore, Turn};
