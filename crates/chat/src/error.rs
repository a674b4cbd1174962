use snafu::Snafu;

use crate::lifecycle::TransitionRejection;
use crate::notification::ErrorKind;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("message is empty after trimming"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("a reply is already streaming"))]
    SessionBusy { stage: &'static str },
    #[snafu(display("no personality preset at index {index}"))]
    UnknownPreset {
        stage: &'static str,
        index: usize,
    },
    #[snafu(display("failed to connect to the chat service: {message}"))]
    Connection {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("chat stream ended abnormally: {message}"))]
    Stream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("illegal lifecycle transition on `{stage}`: {rejection:?}"))]
    Transition {
        stage: &'static str,
        rejection: TransitionRejection,
    },
    #[snafu(display("transcript invariant violated on `{stage}`: {details}"))]
    TranscriptInvariant {
        stage: &'static str,
        details: String,
    },
}

impl ChatError {
    /// Rejections the caller should have prevented; never shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput { .. } | Self::SessionBusy { .. } | Self::UnknownPreset { .. }
        )
    }

    /// Notification kind for errors that end a turn.
    pub fn notification_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::EmptyInput { .. } | Self::SessionBusy { .. } | Self::UnknownPreset { .. } => {
                None
            }
            Self::Connection { .. } => Some(ErrorKind::Connection),
            Self::Stream { .. } | Self::Transition { .. } | Self::TranscriptInvariant { .. } => {
                Some(ErrorKind::Stream)
            }
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
