use persona_llm::{ConversationId, StreamTarget};
use tokio::sync::watch;

use crate::error::{ChatResult, TransitionSnafu};
use crate::lifecycle::{Lifecycle, LifecycleTransition};
use crate::personality::Personality;
use crate::transcript::{Transcript, Turn, TurnStatus};

/// Everything a renderer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub conversation_id: ConversationId,
    pub personality: Personality,
    pub transcript: Transcript,
    pub lifecycle: Lifecycle,
}

/// Single source of truth for the transcript and lifecycle.
///
/// Every mutation goes through the watch sender so subscribers wake up on
/// each change without the store ever blocking.
pub struct TranscriptStore {
    state: watch::Sender<SessionSnapshot>,
}

impl TranscriptStore {
    pub fn new(personality: Personality) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            conversation_id: ConversationId::new(1),
            personality,
            transcript: Transcript::new(),
            lifecycle: Lifecycle::Idle,
        });
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.borrow().lifecycle
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.state.borrow().conversation_id
    }

    pub fn personality(&self) -> Personality {
        self.state.borrow().personality.clone()
    }

    /// Runs `read` against the current transcript without cloning it.
    pub fn with_transcript<R>(&self, read: impl FnOnce(&Transcript) -> R) -> R {
        read(&self.state.borrow().transcript)
    }

    pub fn append(&self, turn: Turn) {
        self.state.send_modify(|state| state.transcript.append(turn));
    }

    pub fn merge_into_last(&self, fragment: &str) -> ChatResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            result = state.transcript.merge_into_last(fragment);
            result.is_ok()
        });
        result
    }

    pub fn settle_open(&self, status: TurnStatus) -> bool {
        self.state
            .send_if_modified(|state| state.transcript.settle_open(status))
    }

    /// Applies a lifecycle transition, publishing only accepted ones.
    pub fn transition(
        &self,
        stage: &'static str,
        transition: LifecycleTransition,
    ) -> ChatResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| match state.lifecycle.apply(transition) {
            Ok(next) => {
                state.lifecycle = next;
                true
            }
            Err(rejection) => {
                result = TransitionSnafu { stage, rejection }.fail();
                false
            }
        });
        result
    }

    /// Opens the assistant turn for `target` with its first fragment.
    ///
    /// The phase change and the new turn are published together, so no
    /// observer sees `Extending` while the user turn is still last.
    pub fn open_assistant_turn(&self, target: StreamTarget, fragment: String) -> ChatResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            match state.lifecycle.apply(LifecycleTransition::FirstFragment(target)) {
                Ok(next) => {
                    state.lifecycle = next;
                    state.transcript.append(Turn::assistant_streaming(fragment));
                    true
                }
                Err(rejection) => {
                    result = TransitionSnafu {
                        stage: "first-fragment",
                        rejection,
                    }
                    .fail();
                    false
                }
            }
        });
        result
    }

    /// Clears the transcript and starts a new conversation epoch.
    pub fn reset(&self, personality: Option<Personality>) -> ConversationId {
        let mut conversation_id = self.conversation_id();
        self.state.send_modify(|state| {
            state.transcript.reset();
            state.lifecycle = Lifecycle::Idle;
            state.conversation_id = ConversationId::new(state.conversation_id.0.saturating_add(1));
            if let Some(personality) = personality {
                state.personality = personality;
            }
            conversation_id = state.conversation_id;
        });
        conversation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TurnPhase;
    use persona_llm::StreamSessionId;

    #[test]
    fn mutations_wake_subscribers() {
        let store = TranscriptStore::new(Personality::default());
        let mut observer = store.subscribe();
        observer.mark_unchanged();

        store.append(Turn::user("Hi"));

        assert!(observer.has_changed().unwrap());
        assert_eq!(observer.borrow_and_update().transcript.len(), 1);
    }

    #[test]
    fn rejected_merge_does_not_notify() {
        let store = TranscriptStore::new(Personality::default());
        store.append(Turn::user("Hi"));
        let mut observer = store.subscribe();
        observer.mark_unchanged();

        assert!(store.merge_into_last("x").is_err());

        assert!(!observer.has_changed().unwrap());
    }

    #[test]
    fn reset_bumps_conversation_and_swaps_personality() {
        let store = TranscriptStore::new(Personality::default());
        let target = StreamTarget::new(store.conversation_id(), StreamSessionId::new(1));
        store.append(Turn::user("Hi"));
        store
            .transition("test", LifecycleTransition::Start(target))
            .unwrap();

        let next_id = store.reset(Some(Personality::new("Pirate", "a pirate")));

        let snapshot = store.snapshot();
        assert_eq!(next_id, ConversationId::new(2));
        assert_eq!(snapshot.conversation_id, next_id);
        assert!(snapshot.transcript.is_empty());
        assert!(snapshot.lifecycle.is_idle());
        assert_eq!(snapshot.personality.label, "Pirate");
    }

    #[test]
    fn first_fragment_publishes_phase_and_turn_together() {
        let store = TranscriptStore::new(Personality::default());
        let target = StreamTarget::new(store.conversation_id(), StreamSessionId::new(1));
        store.append(Turn::user("Hi"));
        store
            .transition("test", LifecycleTransition::Start(target))
            .unwrap();
        let mut observer = store.subscribe();
        observer.mark_unchanged();

        store.open_assistant_turn(target, "Ahoy".to_string()).unwrap();

        let snapshot = observer.borrow_and_update().clone();
        assert_eq!(snapshot.lifecycle.phase(), Some(TurnPhase::Extending));
        assert_eq!(snapshot.transcript.len(), 2);
        assert!(snapshot.transcript.last().is_some_and(|turn| turn.is_open()));
        assert!(!observer.has_changed().unwrap());
    }

    #[test]
    fn rejected_first_fragment_leaves_transcript_alone() {
        let store = TranscriptStore::new(Personality::default());
        let target = StreamTarget::new(store.conversation_id(), StreamSessionId::new(1));
        store.append(Turn::user("Hi"));
        let mut observer = store.subscribe();
        observer.mark_unchanged();

        assert!(store.open_assistant_turn(target, "Ahoy".to_string()).is_err());

        assert!(!observer.has_changed().unwrap());
        assert_eq!(store.snapshot().transcript.len(), 1);
    }
}
