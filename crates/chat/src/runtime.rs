use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::personality::Personality;
use crate::session::SessionDriver;
use crate::store::SessionSnapshot;

/// Renderer requests, applied in order by the session task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    StartTurn(String),
    SelectPreset(usize),
    SetPersonality(Personality),
    NewConversation,
    Stop,
}

/// Renderer-facing handle to a running session.
///
/// The driver lives on its own task; this handle only sends commands and
/// reads snapshots. Dropping it tears the session down and discards any
/// in-flight reply.
pub struct ChatSessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl ChatSessionHandle {
    pub fn spawn(driver: SessionDriver) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let snapshots = driver.subscribe();
        let task = tokio::spawn(run_session(driver, command_rx));

        Self {
            commands,
            snapshots,
            task,
        }
    }

    /// Fire-and-forget; watch the lifecycle for the outcome.
    pub fn start_turn(&self, text: impl Into<String>) {
        self.send(SessionCommand::StartTurn(text.into()));
    }

    pub fn select_preset(&self, index: usize) {
        self.send(SessionCommand::SelectPreset(index));
    }

    pub fn set_personality(&self, personality: Personality) {
        self.send(SessionCommand::SetPersonality(personality));
    }

    pub fn new_conversation(&self) {
        self.send(SessionCommand::NewConversation);
    }

    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Closes the command channel and waits for the session task to exit.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(error) = task.await {
            tracing::warn!(error = %error, "session task ended abnormally");
        }
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("session task is gone; dropping command");
        }
    }
}

async fn run_session(
    mut driver: SessionDriver,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => dispatch(&mut driver, command),
                None => break,
            },
            Some(update) = driver.poll_stream(), if driver.has_open_stream() => {
                driver.apply(update);
            }
        }
    }

    tracing::debug!("session handle dropped; stopping session task");
}

fn dispatch(driver: &mut SessionDriver, command: SessionCommand) {
    let result = match command {
        SessionCommand::StartTurn(text) => driver.start_turn(&text).map(|_| ()),
        SessionCommand::SelectPreset(index) => driver.select_preset(index),
        SessionCommand::SetPersonality(personality) => {
            driver.set_personality(personality);
            Ok(())
        }
        SessionCommand::NewConversation => {
            driver.new_conversation();
            Ok(())
        }
        SessionCommand::Stop => {
            driver.stop();
            Ok(())
        }
    };

    if let Err(error) = result {
        if error.is_silent() {
            tracing::debug!(error = %error, "ignored session command");
        } else {
            tracing::warn!(error = %error, "session command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::notification::{ErrorKind, NotificationReceiver, notification_channel};
    use crate::session::SessionOptions;
    use crate::testing::ScriptedProvider;
    use crate::transcript::{Role, TurnStatus};

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn(provider: Arc<ScriptedProvider>) -> (ChatSessionHandle, NotificationReceiver) {
        spawn_with(provider, SessionOptions::new("test-model"))
    }

    fn spawn_with(
        provider: Arc<ScriptedProvider>,
        options: SessionOptions,
    ) -> (ChatSessionHandle, NotificationReceiver) {
        let (notifier, notifications) = notification_channel();
        let driver = SessionDriver::new(provider, options, Personality::default(), notifier);
        (ChatSessionHandle::spawn(driver), notifications)
    }

    async fn wait_for(
        handle: &ChatSessionHandle,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut snapshots = handle.subscribe();
        let snapshot = tokio::time::timeout(WAIT, snapshots.wait_for(predicate))
            .await
            .expect("timed out waiting for session state")
            .expect("session task exited")
            .clone();
        snapshot
    }

    #[tokio::test]
    async fn handle_streams_reply_to_subscribers() {
        let provider = ScriptedProvider::new();
        let (handle, mut notifications) = spawn(provider.clone());

        handle.start_turn("Hi");
        wait_for(&handle, |snapshot| snapshot.lifecycle.is_streaming()).await;

        let control = provider.take_control();
        control.delta("Hel");
        control.delta("lo!");
        control.done();

        let settled = wait_for(&handle, |snapshot| {
            snapshot.lifecycle.is_idle() && snapshot.transcript.len() == 2
        })
        .await;

        let turns = settled.transcript.turns();
        assert_eq!(turns[0].role(), Role::User);
        assert_eq!(turns[0].content(), "Hi");
        assert_eq!(turns[1].role(), Role::Assistant);
        assert_eq!(turns[1].content(), "Hello!");
        assert_eq!(turns[1].status(), TurnStatus::Done);
        assert!(notifications.try_recv().is_err());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn handle_surfaces_failure_once() {
        let provider = ScriptedProvider::new();
        provider.refuse_next("no route to host");
        let (handle, mut notifications) = spawn(provider.clone());

        handle.start_turn("Hi");
        let notification = tokio::time::timeout(WAIT, notifications.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(notification.kind, ErrorKind::Connection);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.transcript.len(), 1);
        assert!(snapshot.lifecycle.is_idle());
        assert!(notifications.try_recv().is_err());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stop_command_settles_partial_reply() {
        let provider = ScriptedProvider::new();
        let (handle, _notifications) = spawn(provider.clone());

        handle.start_turn("Hi");
        wait_for(&handle, |snapshot| snapshot.lifecycle.is_streaming()).await;
        let control = provider.take_control();
        control.delta("Hel");
        wait_for(&handle, |snapshot| snapshot.transcript.len() == 2).await;

        handle.stop();

        let settled = wait_for(&handle, |snapshot| snapshot.lifecycle.is_idle()).await;
        assert_eq!(
            settled.transcript.last().map(|turn| turn.status()),
            Some(TurnStatus::Cancelled)
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_handle_abandons_in_flight_stream() {
        let provider = ScriptedProvider::new();
        let (handle, mut notifications) = spawn(provider.clone());

        handle.start_turn("Hi");
        wait_for(&handle, |snapshot| snapshot.lifecycle.is_streaming()).await;
        let control = provider.take_control();

        drop(handle);

        tokio::time::timeout(WAIT, control.cancel_rx)
            .await
            .expect("worker was never cancelled")
            .expect("cancel sender dropped without signalling");
        assert!(notifications.recv().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_fires_while_commands_keep_arriving() {
        let provider = ScriptedProvider::new();
        let options =
            SessionOptions::new("test-model").with_stream_idle_timeout(Duration::from_millis(100));
        let (handle, mut notifications) = spawn_with(provider.clone(), options);

        handle.start_turn("Hi");
        wait_for(&handle, |snapshot| snapshot.lifecycle.is_streaming()).await;
        let _control = provider.take_control();

        // Blank prompts are rejected without touching the stream.
        let mut ticker = tokio::time::interval(Duration::from_millis(30));
        let notification = tokio::time::timeout(WAIT, async {
            loop {
                tokio::select! {
                    notification = notifications.recv() => break notification,
                    _ = ticker.tick() => handle.start_turn("   "),
                }
            }
        })
        .await
        .expect("quiet provider never timed out")
        .expect("notification channel closed");

        assert_eq!(notification.kind, ErrorKind::Stream);
        assert!(handle.snapshot().lifecycle.is_idle());
        handle.shutdown().await;
    }
}
