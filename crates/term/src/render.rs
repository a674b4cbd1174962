use std::io::{self, Write};

use persona_chat::{Role, SessionSnapshot, TurnStatus};
use persona_llm::ConversationId;

/// Prints assistant text incrementally as snapshots arrive.
///
/// User turns are not echoed; the terminal already shows what was typed.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    conversation_id: Option<ConversationId>,
    next_turn: usize,
    printed: usize,
    typing_shown: bool,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render<W: Write>(
        &mut self,
        snapshot: &SessionSnapshot,
        out: &mut W,
    ) -> io::Result<()> {
        let label = snapshot.personality.label.as_str();

        if self.conversation_id != Some(snapshot.conversation_id) {
            if self.conversation_id.is_some() {
                writeln!(out, "\n--- new conversation with {label} ---")?;
            }
            self.conversation_id = Some(snapshot.conversation_id);
            self.next_turn = 0;
            self.printed = 0;
            self.typing_shown = false;
        }

        if snapshot.lifecycle.is_awaiting_reply() {
            if !self.typing_shown {
                writeln!(out, "({label} is typing...)")?;
                self.typing_shown = true;
            }
        } else {
            self.typing_shown = false;
        }

        let turns = snapshot.transcript.turns();
        while let Some(turn) = turns.get(self.next_turn) {
            if turn.role() == Role::User {
                self.next_turn += 1;
                self.printed = 0;
                continue;
            }

            if self.printed == 0 {
                write!(out, "{label}: ")?;
            }
            // Content only ever grows by appending, so the old length is a char boundary.
            let content = turn.content();
            write!(out, "{}", content.get(self.printed..).unwrap_or_default())?;
            self.printed = content.len();

            if turn.is_open() {
                break;
            }

            let suffix = match turn.status() {
                TurnStatus::Truncated => " [reply cut off]",
                TurnStatus::Cancelled => " [stopped]",
                TurnStatus::Done | TurnStatus::Streaming => "",
            };
            writeln!(out, "{suffix}")?;
            self.next_turn += 1;
            self.printed = 0;
        }

        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_chat::{Lifecycle, Personality, Transcript, Turn, TurnPhase};
    use persona_llm::{StreamSessionId, StreamTarget};

    fn snapshot(
        conversation: u64,
        transcript: Transcript,
        lifecycle: Lifecycle,
    ) -> SessionSnapshot {
        SessionSnapshot {
            conversation_id: ConversationId::new(conversation),
            personality: Personality::new("Pirate", "a pirate"),
            transcript,
            lifecycle,
        }
    }

    fn streaming(phase: TurnPhase) -> Lifecycle {
        Lifecycle::Streaming {
            target: StreamTarget::new(ConversationId::new(1), StreamSessionId::new(1)),
            phase,
        }
    }

    fn render_all(printer: &mut TranscriptPrinter, snapshots: &[SessionSnapshot]) -> String {
        let mut out = Vec::new();
        for snapshot in snapshots {
            printer.render(snapshot, &mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn prints_only_new_fragments() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));
        let waiting = snapshot(
            1,
            transcript.clone(),
            streaming(TurnPhase::AwaitingFirstFragment),
        );

        transcript.append(Turn::assistant_streaming("Ahoy"));
        let first = snapshot(1, transcript.clone(), streaming(TurnPhase::Extending));

        transcript.merge_into_last(", matey!").unwrap();
        transcript.settle_open(TurnStatus::Done);
        let settled = snapshot(1, transcript, Lifecycle::Idle);

        let output = render_all(&mut TranscriptPrinter::new(), &[waiting, first, settled]);

        assert_eq!(output, "(Pirate is typing...)\nPirate: Ahoy, matey!\n");
    }

    #[test]
    fn marks_truncated_reply_and_new_conversation() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::user("Hi"));
        transcript.append(Turn::assistant_streaming("Hello wor"));
        transcript.settle_open(TurnStatus::Truncated);
        let failed = snapshot(1, transcript, Lifecycle::Idle);
        let reset = snapshot(2, Transcript::new(), Lifecycle::Idle);

        let output = render_all(&mut TranscriptPrinter::new(), &[failed, reset]);

        assert_eq!(
            output,
            "Pirate: Hello wor [reply cut off]\n\n--- new conversation with Pirate ---\n"
        );
    }
}
