//! Clinguard CLI library: a terminal REPL around the guardrail orchestrator.

pub mod chatbot;

pub use chatbot::{ChatBot, ChatBotConfig};
