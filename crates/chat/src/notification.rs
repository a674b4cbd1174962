use tokio::sync::mpsc;

use crate::error::ChatError;

/// Kinds of failure that reach the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The stream never opened; no assistant content exists.
    Connection,
    /// The stream opened and then ended without an end-of-stream signal.
    Stream,
}

impl ErrorKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Connection => "Connection Error",
            Self::Stream => "Chat Error",
        }
    }
}

/// One user-visible error, fired at most once per failed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatNotification {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatNotification {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(error: &ChatError) -> Option<Self> {
        error
            .notification_kind()
            .map(|kind| Self::new(kind, error.to_string()))
    }

    pub fn title(&self) -> &'static str {
        self.kind.title()
    }
}

pub type NotificationReceiver = mpsc::UnboundedReceiver<ChatNotification>;

/// Sending half of the error channel handed to the driver.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<ChatNotification>,
}

impl Notifier {
    /// Delivers a notification. A closed receiver only means nobody is
    /// watching anymore.
    pub fn notify(&self, notification: ChatNotification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification receiver dropped; discarding error notification");
        }
    }
}

pub fn notification_channel() -> (Notifier, NotificationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx }, rx)
}
