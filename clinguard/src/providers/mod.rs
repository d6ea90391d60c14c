//! Model collaborator implementations.
//!
//! - [`OpenAIChatModel`]: any `OpenAI`-compatible chat completions endpoint.
//! - [`ScriptedModel`]: plays back canned replies, for offline sessions and tests.

pub mod openai;
pub mod scripted;

pub use openai::{OpenAIChatModel, OpenAIChatModelBuilder};
pub use scripted::{RecordedCall, ScriptedModel, ScriptedReply};
