//! End-of-conversation detection.
//!
//! The [`EndOfTurnDetector`] looks for closing language in user turns
//! (gratitude, farewells, "that's all", "I should go") and decides when the
//! application should offer feedback. Every function here is deterministic:
//! the same inputs always produce the same answer.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::guardrail::RuleTable;

/// Family of a closing phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndPhraseKind {
    /// "thank you", "thanks".
    Gratitude,
    /// "bye", "take care".
    Farewell,
    /// "that's all", "I'm done".
    Completion,
    /// "I should go", "let's wrap up".
    Closing,
}

impl fmt::Display for EndPhraseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gratitude => "gratitude",
            Self::Farewell => "farewell",
            Self::Completion => "completion",
            Self::Closing => "closing",
        })
    }
}

/// A detected closing phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndPhrase {
    /// Phrase family.
    pub kind: EndPhraseKind,
    /// The matched text, lower-cased.
    pub phrase: String,
}

const END_PHRASE_RULES: &[(&str, EndPhraseKind, &str)] = &[
    (
        "gratitude",
        EndPhraseKind::Gratitude,
        r"\b(?:thank\s+you|thanks|thx|much\s+appreciated|i\s+appreciate\s+(?:it|that|your\s+time))\b",
    ),
    (
        "farewell",
        EndPhraseKind::Farewell,
        r"\b(?:good\s*bye|bye|see\s+you(?:\s+later)?|take\s+care|have\s+a\s+(?:good|great|nice)\s+(?:day|one|night|evening)|talk\s+(?:to\s+you\s+)?(?:soon|later))\b",
    ),
    (
        "completion",
        EndPhraseKind::Completion,
        r"\b(?:that['’]?s\s+(?:all|it|everything)|that\s+is\s+(?:all|it|everything)|i['’]?m\s+(?:done|finished|all\s+set)|we['’]?re\s+(?:done|finished|all\s+set)|nothing\s+else|no\s+more\s+questions)\b",
    ),
    (
        "closing",
        EndPhraseKind::Closing,
        r"\b(?:i\s+(?:should|need\s+to|have\s+to|must|better)\s+(?:go|get\s+going|head\s+out|run)|gotta\s+go|i['’]?ll\s+let\s+you\s+go|let['’]?s\s+wrap\s+(?:this\s+|things\s+)?up)\b",
    ),
];

const CLOSING_MESSAGES: &[&str] = &[
    "It sounds like we've reached a natural stopping point. Feedback on this conversation is ready whenever you are.",
    "Thanks for the conversation. You can review feedback on your approach now.",
    "This looks like a good place to wrap up. Feedback on how the conversation went is now available.",
];

/// Per-session closure bookkeeping.
///
/// Updated after every accepted or input-blocked user turn. Readiness only
/// ever goes from `false` to `true`; [`reset`](Self::reset) is the only way
/// back, used when the user starts a new conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationClosureState {
    /// User turns observed so far.
    pub turn_count: usize,
    /// Most recent closing phrase seen, if any.
    pub last_detected_phrase: Option<String>,
    /// Whether feedback should be offered.
    pub ready_for_feedback: bool,
}

impl ConversationClosureState {
    /// Start over for a new conversation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Decides whether a user turn closes the conversation.
#[derive(Debug, Clone)]
pub struct EndOfTurnDetector {
    phrases: RuleTable<EndPhraseKind>,
    feedback_turn_threshold: usize,
}

impl Default for EndOfTurnDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EndOfTurnDetector {
    /// Turn count at which feedback is offered regardless of wording.
    pub const DEFAULT_FEEDBACK_TURN_THRESHOLD: usize = 20;

    /// Create a detector with the built-in phrase table.
    #[must_use]
    pub fn new() -> Self {
        let phrases = END_PHRASE_RULES
            .iter()
            .fold(RuleTable::new(), |table, (name, kind, pattern)| {
                table.rule(*name, *kind, pattern)
            });
        Self {
            phrases,
            feedback_turn_threshold: Self::DEFAULT_FEEDBACK_TURN_THRESHOLD,
        }
    }

    /// Set the turn count at which feedback is offered.
    #[must_use]
    pub const fn with_feedback_turn_threshold(mut self, threshold: usize) -> Self {
        self.feedback_turn_threshold = threshold;
        self
    }

    /// Find the first closing phrase in `text`, case-insensitively.
    #[must_use]
    pub fn detect_end_phrase(&self, text: &str) -> Option<EndPhrase> {
        self.phrases.first_match(text).map(|m| EndPhrase {
            kind: m.kind,
            phrase: m.matched.to_lowercase(),
        })
    }

    /// Pick a closing message; `index` wraps around the pool.
    #[must_use]
    pub fn closing_message(&self, index: usize) -> &'static str {
        CLOSING_MESSAGES[index % CLOSING_MESSAGES.len()]
    }

    /// Whether to offer feedback after `text` at `turn_count`.
    #[must_use]
    pub fn should_prompt_feedback(&self, text: &str, turn_count: usize) -> bool {
        turn_count >= self.feedback_turn_threshold || self.detect_end_phrase(text).is_some()
    }

    /// Record one user turn in `state`.
    ///
    /// Returns `true` when this turn is the one that made feedback available.
    pub fn observe(&self, state: &mut ConversationClosureState, text: &str) -> bool {
        state.turn_count += 1;
        if let Some(end) = self.detect_end_phrase(text) {
            state.last_detected_phrase = Some(end.phrase);
        }
        let should_prompt = self.should_prompt_feedback(text, state.turn_count);

        let newly_ready = should_prompt && !state.ready_for_feedback;
        if newly_ready {
            info!(
                turns = state.turn_count,
                phrase = ?state.last_detected_phrase,
                "conversation ready for feedback"
            );
        }
        state.ready_for_feedback |= should_prompt;
        newly_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_case_insensitive() {
        let detector = EndOfTurnDetector::new();
        let upper = detector.detect_end_phrase("THANK YOU").unwrap();
        let lower = detector.detect_end_phrase("thank you").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.kind, EndPhraseKind::Gratitude);
        assert_eq!(upper.phrase, "thank you");
    }

    #[test]
    fn test_first_category_wins() {
        let detector = EndOfTurnDetector::new();
        let end = detector.detect_end_phrase("Thanks so much, bye!").unwrap();
        assert_eq!(end.kind, EndPhraseKind::Gratitude);
        assert_eq!(end.phrase, "thanks");
    }

    #[test]
    fn test_each_category() {
        let detector = EndOfTurnDetector::new();
        for (text, kind) in [
            ("Okay, goodbye", EndPhraseKind::Farewell),
            ("I think that's all for today", EndPhraseKind::Completion),
            ("I’m done here", EndPhraseKind::Completion),
            ("I should go pick up my kid", EndPhraseKind::Closing),
        ] {
            assert_eq!(detector.detect_end_phrase(text).map(|e| e.kind), Some(kind), "for '{text}'");
        }
    }

    #[test]
    fn test_ordinary_text_not_closing() {
        let detector = EndOfTurnDetector::new();
        for text in ["How often do you brush?", "What worries you about the vaccine?", "Thanksgiving plans?"] {
            assert!(detector.detect_end_phrase(text).is_none(), "false positive on '{text}'");
        }
    }

    #[test]
    fn test_closing_message_wraps() {
        let detector = EndOfTurnDetector::new();
        assert_eq!(detector.closing_message(0), detector.closing_message(CLOSING_MESSAGES.len()));
        assert_ne!(detector.closing_message(0), detector.closing_message(1));
    }

    #[test]
    fn test_should_prompt_feedback() {
        let detector = EndOfTurnDetector::new();
        assert!(detector.should_prompt_feedback("Tell me more", 20));
        assert!(detector.should_prompt_feedback("", 25));
        for turn in 0..20 {
            for text in ["Tell me more", "Thanks so much, bye!"] {
                assert_eq!(
                    detector.should_prompt_feedback(text, turn),
                    detector.detect_end_phrase(text).is_some()
                );
            }
        }
        assert!(detector.should_prompt_feedback("Thanks so much, bye!", 8));
    }

    #[test]
    fn test_observe_is_monotonic() {
        let detector = EndOfTurnDetector::new().with_feedback_turn_threshold(5);
        let mut state = ConversationClosureState::default();

        assert!(!detector.observe(&mut state, "Hello there"));
        assert!(detector.observe(&mut state, "Thanks!"));
        assert!(state.ready_for_feedback);
        assert_eq!(state.last_detected_phrase.as_deref(), Some("thanks"));

        assert!(!detector.observe(&mut state, "Actually one more question"));
        assert!(state.ready_for_feedback);
        assert_eq!(state.turn_count, 3);

        state.reset();
        assert_eq!(state, ConversationClosureState::default());
    }

    #[test]
    fn test_observe_turn_threshold() {
        let detector = EndOfTurnDetector::new().with_feedback_turn_threshold(2);
        let mut state = ConversationClosureState::default();
        assert!(!detector.observe(&mut state, "Hello"));
        assert!(detector.observe(&mut state, "How are you"));
        assert!(state.last_detected_phrase.is_none());
    }

    #[test]
    fn test_observe_follows_should_prompt_feedback() {
        let detector = EndOfTurnDetector::new().with_feedback_turn_threshold(4);
        let texts = ["Tell me more", "That's all for today", "How often?", "Okay", "Bye now"];
        for (i, text) in texts.iter().enumerate() {
            let mut state = ConversationClosureState {
                turn_count: i,
                ..ConversationClosureState::default()
            };
            let newly_ready = detector.observe(&mut state, text);
            let expected = detector.should_prompt_feedback(text, i + 1);
            assert_eq!(newly_ready, expected, "turn {} '{text}'", i + 1);
            assert_eq!(state.ready_for_feedback, expected);
        }
    }
}
