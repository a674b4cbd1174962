use std::sync::Arc;
use std::time::Duration;

use persona_llm::{
    LlmProvider, ProviderEventStream, ProviderMessage, StreamEventMapped, StreamEventPayload,
    StreamPhase, StreamRequest, StreamSessionId, StreamTarget,
};
use snafu::OptionExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{
    ChatError, ChatResult, ConnectionSnafu, EmptyInputSnafu, SessionBusySnafu, StreamSnafu,
    UnknownPresetSnafu,
};
use crate::lifecycle::{Lifecycle, LifecycleTransition, TurnPhase};
use crate::notification::{ChatNotification, Notifier};
use crate::personality::{Personality, preset};
use crate::store::{SessionSnapshot, TranscriptStore};
use crate::transcript::{Turn, TurnStatus};

/// Request shaping applied to every turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub model_id: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Fails the turn when the provider goes quiet for this long.
    pub stream_idle_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            temperature: None,
            max_tokens: None,
            stream_idle_timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = Some(timeout);
        self
    }
}

/// One observation from the open provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Event(StreamEventMapped),
    /// The provider hung up without a terminal event.
    Closed(StreamTarget),
    TimedOut(StreamTarget),
}

/// Driver-level stream resources kept outside the observable state.
struct ActiveStream {
    target: StreamTarget,
    stream: ProviderEventStream,
    worker_task: JoinHandle<()>,
    /// Moves forward only when the provider delivers something.
    idle_deadline: Option<Instant>,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        // Signal the worker first so it can cancel upstream IO, then make sure
        // it cannot outlive the stream it was feeding.
        self.stream.cancel();
        self.worker_task.abort();
    }
}

/// Orchestrates request/response cycles against one provider and owns the
/// session's transcript store.
pub struct SessionDriver {
    provider: Arc<dyn LlmProvider>,
    options: SessionOptions,
    store: TranscriptStore,
    notifier: Notifier,
    next_stream_session_id: u64,
    active_stream: Option<ActiveStream>,
}

impl SessionDriver {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        options: SessionOptions,
        personality: Personality,
        notifier: Notifier,
    ) -> Self {
        Self {
            provider,
            options,
            store: TranscriptStore::new(personality),
            notifier,
            next_stream_session_id: 1,
            active_stream: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.store.lifecycle()
    }

    pub fn is_streaming(&self) -> bool {
        self.store.lifecycle().is_streaming()
    }

    pub fn has_open_stream(&self) -> bool {
        self.active_stream.is_some()
    }

    /// Starts a turn: appends the user message and opens the provider stream.
    ///
    /// `EmptyInput` and `SessionBusy` leave the session untouched. Once a turn
    /// is accepted its outcome is only observable through the lifecycle and
    /// the notification channel, so failures to open still return `Ok`.
    pub fn start_turn(&mut self, user_text: &str) -> ChatResult<StreamTarget> {
        if user_text.trim().is_empty() {
            return EmptyInputSnafu {
                stage: "start-turn",
            }
            .fail();
        }

        if self.is_streaming() || self.active_stream.is_some() {
            return SessionBusySnafu {
                stage: "start-turn",
            }
            .fail();
        }

        let target = StreamTarget::new(
            self.store.conversation_id(),
            StreamSessionId::new(self.next_stream_session_id),
        );
        // Reserve the next session id immediately so follow-up turns never reuse a target.
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);

        self.store.append(Turn::user(user_text));
        self.store
            .transition("start-turn", LifecycleTransition::Start(target))?;

        let request = self.build_request(target);
        tracing::debug!(
            target = ?target,
            provider_id = %self.provider.id(),
            model_id = %request.model_id,
            message_count = request.messages.len(),
            "opening provider stream"
        );

        match self.provider.stream_chat(request) {
            Ok(handle) => {
                self.active_stream = Some(ActiveStream {
                    target,
                    stream: handle.stream,
                    worker_task: tokio::spawn(handle.worker),
                    idle_deadline: self.next_idle_deadline(),
                });
            }
            Err(error) => {
                self.fail_turn(
                    target,
                    ChatError::Connection {
                        stage: "stream-chat",
                        message: error.to_string(),
                    },
                );
            }
        }

        Ok(target)
    }

    fn build_request(&self, target: StreamTarget) -> StreamRequest {
        let messages = self.store.with_transcript(|transcript| {
            transcript
                .turns()
                .iter()
                .map(|turn| ProviderMessage::new(turn.role(), turn.content()))
                .collect::<Vec<_>>()
        });

        let mut request = StreamRequest::new(target, self.options.model_id.clone(), messages)
            .with_preamble(self.store.personality().preamble());
        if let Some(temperature) = self.options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    fn next_idle_deadline(&self) -> Option<Instant> {
        self.options
            .stream_idle_timeout
            .map(|limit| Instant::now() + limit)
    }

    /// Waits for the next observation from the open stream.
    ///
    /// Returns `None` when no stream is open. Cancel-safe, so it can sit in a
    /// `select!` next to other inputs. Only provider events push the idle
    /// deadline back; a dropped poll leaves it where it was.
    pub async fn poll_stream(&mut self) -> Option<StreamUpdate> {
        let idle_limit = self.options.stream_idle_timeout;
        let active = self.active_stream.as_mut()?;
        let target = active.target;

        let next = match active.idle_deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, active.stream.recv()).await {
                    Ok(next) => next,
                    Err(_) => return Some(StreamUpdate::TimedOut(target)),
                }
            }
            None => active.stream.recv().await,
        };

        Some(match next {
            Some(event) => {
                active.idle_deadline = idle_limit.map(|limit| Instant::now() + limit);
                StreamUpdate::Event(event)
            }
            None => StreamUpdate::Closed(target),
        })
    }

    /// Applies one observation to the transcript and lifecycle.
    pub fn apply(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Event(event) => self.apply_event(event),
            StreamUpdate::Closed(target) => self.fail_turn(
                target,
                ChatError::Stream {
                    stage: "stream-closed",
                    message: "provider stream ended before a terminal event".to_string(),
                },
            ),
            StreamUpdate::TimedOut(target) => {
                let waited = self.options.stream_idle_timeout.unwrap_or_default();
                self.fail_turn(
                    target,
                    ChatError::Stream {
                        stage: "stream-idle-timeout",
                        message: format!("timed out after {waited:?} waiting for the reply"),
                    },
                );
            }
        }
    }

    /// Polls and applies one observation. Returns false once nothing is open.
    pub async fn pump(&mut self) -> bool {
        match self.poll_stream().await {
            Some(update) => {
                self.apply(update);
                true
            }
            None => false,
        }
    }

    /// Drives the open stream until the lifecycle settles.
    pub async fn run_until_settled(&mut self) {
        while self.is_streaming() && self.pump().await {}
    }

    fn apply_event(&mut self, event: StreamEventMapped) {
        let target = event.target;
        if !self.store.lifecycle().accepts_stream_event(target) {
            // Strict target equality keeps chunks from leaking across turns and resets.
            tracing::trace!(target = ?target, "dropping stale stream event");
            return;
        }

        match event.payload {
            StreamEventPayload::Delta(fragment) => {
                if let Err(error) = self.apply_fragment(target, fragment) {
                    tracing::error!(target = ?target, error = %error, "failed to merge fragment");
                    self.fail_turn(target, error);
                }
            }
            StreamEventPayload::Done => self.complete_turn(target),
            StreamEventPayload::Failed { phase, message } => {
                let error = match phase {
                    StreamPhase::Open => ConnectionSnafu {
                        stage: "provider-open",
                        message,
                    }
                    .build(),
                    StreamPhase::Transfer => StreamSnafu {
                        stage: "provider-transfer",
                        message,
                    }
                    .build(),
                };
                self.fail_turn(target, error);
            }
        }
    }

    /// Upsert merge: the first fragment opens the assistant turn, later ones extend it.
    fn apply_fragment(&mut self, target: StreamTarget, fragment: String) -> ChatResult<()> {
        if fragment.is_empty() {
            return Ok(());
        }

        match self.store.lifecycle().phase() {
            Some(TurnPhase::AwaitingFirstFragment) => {
                self.store.open_assistant_turn(target, fragment)
            }
            Some(TurnPhase::Extending) => self.store.merge_into_last(&fragment),
            None => Ok(()),
        }
    }

    fn complete_turn(&mut self, target: StreamTarget) {
        self.active_stream = None;
        self.store.settle_open(TurnStatus::Done);
        if let Err(error) = self
            .store
            .transition("complete-turn", LifecycleTransition::Complete(target))
        {
            tracing::error!(target = ?target, error = %error, "failed to settle completed turn");
            return;
        }
        tracing::debug!(target = ?target, "turn completed");
    }

    /// Settles a failed turn and surfaces exactly one notification.
    ///
    /// Partial assistant content is kept and marked truncated.
    fn fail_turn(&mut self, target: StreamTarget, error: ChatError) {
        if !self.store.lifecycle().accepts_stream_event(target) {
            return;
        }

        self.active_stream = None;
        self.store.settle_open(TurnStatus::Truncated);
        if let Err(transition_error) = self
            .store
            .transition("fail-turn", LifecycleTransition::Fail(target))
        {
            tracing::error!(
                target = ?target,
                error = %transition_error,
                "failed to settle failed turn"
            );
        }

        tracing::warn!(target = ?target, error = %error, "turn failed");
        if let Some(notification) = ChatNotification::from_error(&error) {
            self.notifier.notify(notification);
        }
    }

    /// Stops the active stream, keeping whatever text already arrived.
    ///
    /// Returns whether a stream was stopped.
    pub fn stop(&mut self) -> bool {
        let Some(target) = self.store.lifecycle().active_target() else {
            return false;
        };

        // Dropping the stream signals cancellation to the provider worker.
        self.active_stream = None;
        self.store.settle_open(TurnStatus::Cancelled);
        if let Err(error) = self
            .store
            .transition("stop", LifecycleTransition::Cancel(target))
        {
            tracing::error!(target = ?target, error = %error, "failed to cancel turn");
        }
        tracing::debug!(target = ?target, "turn cancelled");
        true
    }

    /// Switches persona. History is discarded rather than carried over.
    pub fn set_personality(&mut self, personality: Personality) {
        self.stop();
        let conversation_id = self.store.reset(Some(personality));
        tracing::info!(
            conversation_id = conversation_id.0,
            personality = %self.store.personality().label,
            "personality changed; started new conversation"
        );
    }

    pub fn select_preset(&mut self, index: usize) -> ChatResult<()> {
        let preset = preset(index).context(UnknownPresetSnafu {
            stage: "select-preset",
            index,
        })?;
        self.set_personality(Personality::from(preset));
        Ok(())
    }

    pub fn new_conversation(&mut self) {
        self.stop();
        let conversation_id = self.store.reset(None);
        tracing::info!(conversation_id = conversation_id.0, "started new conversation");
    }
}
