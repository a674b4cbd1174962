#![deny(unsafe_code)]

//! Streaming-session engine for persona chat.
//!
//! A [`SessionDriver`] owns one conversation: it appends user turns, opens a
//! provider stream per turn and merges fragments into the transcript held by a
//! [`TranscriptStore`]. Renderers observe [`SessionSnapshot`]s and receive
//! [`ChatNotification`]s for failed turns. [`ChatSessionHandle`] runs the
//! driver on its own task.

pub mod error;
pub mod lifecycle;
pub mod notification;
pub mod personality;
pub mod runtime;
pub mod session;
pub mod store;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ChatError, ChatResult};
pub use lifecycle::{Lifecycle, LifecycleTransition, TransitionRejection, TurnPhase};
pub use notification::{
    ChatNotification, ErrorKind, NotificationReceiver, Notifier, notification_channel,
};
pub use personality::{DEFAULT_PRESET_INDEX, PERSONALITY_PRESETS, Personality, Preset, preset};
pub use runtime::{ChatSessionHandle, SessionCommand};
pub use session::{SessionDriver, SessionOptions, StreamUpdate};
pub use store::{SessionSnapshot, TranscriptStore};
pub use transcript::{Role, Transcript, Turn, TurnStatus};
