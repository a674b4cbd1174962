use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use persona_llm::{
    LlmProvider, ProviderError, ProviderResult, ProviderStreamHandle, ProviderWorker,
    StreamEventMapped, StreamPhase, StreamRequest, StreamTarget, make_event_stream,
};
use tokio::sync::{mpsc, oneshot};

/// In-memory provider whose streams are fed by the test body.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    refuse_next: Mutex<Option<String>>,
    requests: Mutex<Vec<StreamRequest>>,
    controls: Mutex<VecDeque<StreamControl>>,
}

/// Test-side end of one opened stream.
pub(crate) struct StreamControl {
    pub target: StreamTarget,
    events: mpsc::UnboundedSender<StreamEventMapped>,
    pub cancel_rx: oneshot::Receiver<()>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `stream_chat` call fail before any stream exists.
    pub fn refuse_next(&self, message: &str) {
        *self.refuse_next.lock().unwrap() = Some(message.to_string());
    }

    pub fn take_control(&self) -> StreamControl {
        self.controls
            .lock()
            .unwrap()
            .pop_front()
            .expect("no stream was opened")
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stream_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl StreamControl {
    pub fn delta(&self, text: &str) -> bool {
        self.events
            .send(StreamEventMapped::delta(self.target, text))
            .is_ok()
    }

    pub fn done(&self) -> bool {
        self.events.send(StreamEventMapped::done(self.target)).is_ok()
    }

    pub fn fail(&self, phase: StreamPhase, message: &str) -> bool {
        self.events
            .send(StreamEventMapped::failed(self.target, phase, message))
            .is_ok()
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }


    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(provider_id) = self.refuse_next.lock().unwrap().take() {
            return Err(ProviderError::UnsupportedProvider {
                stage: "scripted-refuse",
                provider_id,
            });
        }

        let (events, stream, cancel_rx) = make_event_stream();
        self.controls.lock().unwrap().push_back(StreamControl {
            target: request.target,
            events,
            cancel_rx,
        });

        let worker: ProviderWorker = Box::pin(async {});
        Ok(ProviderStreamHandle { stream, worker })
    }
}
