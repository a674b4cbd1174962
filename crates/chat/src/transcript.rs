use snafu::ensure;

use crate::error::{ChatResult, TranscriptInvariantSnafu};

pub use persona_llm::Role;

/// Lifecycle status for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Still receiving fragments. Only the trailing assistant turn may be here.
    Streaming,
    Done,
    /// The stream failed after opening; content is kept as-is.
    Truncated,
    Cancelled,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: String,
    status: TurnStatus,
}

impl Turn {
    /// User turns are complete the moment they are created.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            status: TurnStatus::Done,
        }
    }

    /// Opens an assistant turn seeded with its first fragment.
    pub fn assistant_streaming(first_fragment: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: first_fragment.into(),
            status: TurnStatus::Streaming,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == TurnStatus::Streaming
    }
}

/// Ordered, append-only conversation history.
///
/// The only in-place mutation is content growth of the trailing open
/// assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn open_turn(&self) -> Option<&Turn> {
        self.turns.last().filter(|turn| turn.is_open())
    }

    /// Number of turns still receiving fragments. Never more than one.
    pub fn open_turn_count(&self) -> usize {
        self.turns.iter().filter(|turn| turn.is_open()).count()
    }

    /// Appends a turn at the end.
    ///
    /// Callers guarantee no open assistant turn is already trailing; the
    /// store does not re-validate this beyond a debug assertion.
    pub fn append(&mut self, turn: Turn) {
        debug_assert!(
            self.open_turn().is_none(),
            "append while an assistant turn is still open"
        );
        self.turns.push(turn);
    }

    /// Concatenates `fragment` onto the trailing open assistant turn.
    pub fn merge_into_last(&mut self, fragment: &str) -> ChatResult<()> {
        let Some(last) = self.turns.last_mut() else {
            return TranscriptInvariantSnafu {
                stage: "merge-into-last",
                details: "transcript is empty".to_string(),
            }
            .fail();
        };

        ensure!(
            last.role == Role::Assistant && last.is_open(),
            TranscriptInvariantSnafu {
                stage: "merge-into-last",
                details: format!(
                    "last turn is {} ({:?}), expected an open assistant turn",
                    last.role.as_str(),
                    last.status
                ),
            }
        );

        last.content.push_str(fragment);
        Ok(())
    }

    /// Closes the open turn, if any, with a final status.
    ///
    /// Returns whether a turn was settled.
    pub fn settle_open(&mut self, status: TurnStatus) -> bool {
        debug_assert!(status != TurnStatus::Streaming);
        match self.turns.last_mut() {
            Some(last) if last.is_open() => {
                last.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    #[test]
    fn merge_concatenates_in_delivery_order() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));
        transcript.append(Turn::assistant_streaming("Hel"));

        for fragment in ["lo", ", ", "world", "!"] {
            transcript.merge_into_last(fragment).unwrap();
        }

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.turns()[1].content(), "Hello, world!");
        assert_eq!(transcript.open_turn_count(), 1);
    }

    #[test]
    fn merge_into_empty_transcript_is_an_invariant_error() {
        let mut transcript = Transcript::new();
        let error = transcript.merge_into_last("x").err();
        assert!(matches!(error, Some(ChatError::TranscriptInvariant { .. })));
    }

    #[test]
    fn merge_into_user_turn_is_an_invariant_error() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));

        let error = transcript.merge_into_last("x").err();

        assert!(matches!(error, Some(ChatError::TranscriptInvariant { .. })));
        assert_eq!(transcript.turns()[0].content(), "Hi");
    }

    #[test]
    fn merge_into_settled_assistant_turn_is_rejected() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));
        transcript.append(Turn::assistant_streaming("Hello"));
        assert!(transcript.settle_open(TurnStatus::Done));

        assert!(transcript.merge_into_last(" again").is_err());
        assert_eq!(transcript.turns()[1].content(), "Hello");
    }

    #[test]
    fn settle_open_closes_only_trailing_open_turn() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));
        assert!(!transcript.settle_open(TurnStatus::Truncated));

        transcript.append(Turn::assistant_streaming("Hel"));
        assert!(transcript.settle_open(TurnStatus::Truncated));

        assert_eq!(transcript.open_turn_count(), 0);
        assert_eq!(transcript.turns()[1].status(), TurnStatus::Truncated);
        assert_eq!(transcript.turns()[0].status(), TurnStatus::Done);
    }

    #[test]
    fn reset_clears_every_turn() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));
        transcript.append(Turn::assistant_streaming("Hello"));

        transcript.reset();

        assert!(transcript.is_empty());
        assert!(transcript.open_turn().is_none());
    }
}
