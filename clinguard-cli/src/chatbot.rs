//! Interactive roleplay session in the terminal.

use std::io::{self, Write};

use clinguard::{GuardrailOrchestrator, Result, Session, TurnOutcome, TurnState};

/// Display options for the chatbot.
#[derive(Debug, Clone, Default)]
pub struct ChatBotConfig {
    /// Print which guardrail fired after each turn.
    pub show_guardrail: bool,
}

/// A REPL driving one [`Session`] through a [`GuardrailOrchestrator`].
#[derive(Debug)]
pub struct ChatBot {
    orchestrator: GuardrailOrchestrator,
    session: Session,
    config: ChatBotConfig,
}

impl ChatBot {
    /// Create a chatbot for an already started session.
    #[inline]
    pub const fn new(orchestrator: GuardrailOrchestrator, session: Session, config: ChatBotConfig) -> Self {
        Self {
            orchestrator,
            session,
            config,
        }
    }

    /// The current session.
    #[inline]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Run one turn and print the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the turn could not be stored.
    pub async fn chat(&mut self, input: &str) -> Result<TurnOutcome> {
        let outcome = self.orchestrator.handle_turn(&mut self.session, input).await?;

        println!("{}", outcome.display_text);
        if self.config.show_guardrail
            && let Some(result) = &outcome.classification
        {
            let action = match outcome.state {
                TurnState::InputBlocked => "redirected",
                _ => "regenerated",
            };
            println!(
                "[guardrail: {} ({}), {action}, {} model call(s)]",
                result.category,
                result.matched_rule.as_deref().unwrap_or("-"),
                outcome.model_calls
            );
        }
        if let Some(prompt) = &outcome.closing_prompt {
            println!();
            println!("{prompt}");
        }

        Ok(outcome)
    }

    /// Start a new conversation in the same scenario.
    pub fn reset(&mut self) {
        self.orchestrator.reset(&mut self.session);
    }

    /// Run the interactive REPL loop.
    ///
    /// # Errors
    ///
    /// Returns an error if a turn could not be stored.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        println!(
            "Clinguard: {} roleplay (type 'exit' to quit, 'new' to start over)",
            self.session.domain().domain_name
        );
        println!();

        loop {
            print!("> ");
            stdout.flush().ok();

            let mut input = String::new();
            match stdin.read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => continue,
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match input {
                "exit" | "quit" => break,
                "new" => {
                    self.reset();
                    println!("Started a new conversation.");
                    println!();
                    continue;
                }
                _ => {}
            }

            println!();
            self.chat(input).await?;
            println!();
        }

        Ok(())
    }
}
