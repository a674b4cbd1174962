use persona_llm::StreamTarget;

/// Per-turn merge phase while a reply is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnPhase {
    /// No assistant turn exists yet for this reply; the next fragment opens one.
    AwaitingFirstFragment,
    /// The trailing assistant turn is open and grows with each fragment.
    Extending,
}

/// Session-wide lifecycle gating whether a new turn may begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Streaming {
        target: StreamTarget,
        phase: TurnPhase,
    },
}

/// State transition input for the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    Start(StreamTarget),
    FirstFragment(StreamTarget),
    Complete(StreamTarget),
    Fail(StreamTarget),
    Cancel(StreamTarget),
}

/// Rejection reason for illegal lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    AssistantTurnAlreadyOpen(StreamTarget),
}

pub type TransitionResult = Result<Lifecycle, TransitionRejection>;

impl Lifecycle {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Returns the active target if and only if streaming.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Streaming { target, .. } => Some(*target),
            Self::Idle => None,
        }
    }

    pub fn phase(&self) -> Option<TurnPhase> {
        match self {
            Self::Streaming { phase, .. } => Some(*phase),
            Self::Idle => None,
        }
    }

    /// True while a reply was requested but no text has arrived yet.
    ///
    /// Renderers use this to show a typing indicator.
    pub fn is_awaiting_reply(&self) -> bool {
        self.phase() == Some(TurnPhase::AwaitingFirstFragment)
    }

    /// Returns true when incoming stream data matches the active session.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Idle` may start a session. Every other transition must name the
    /// active target exactly.
    pub fn apply(&self, transition: LifecycleTransition) -> TransitionResult {
        match transition {
            LifecycleTransition::Start(target) => self.apply_start(target),
            LifecycleTransition::FirstFragment(target) => self.apply_first_fragment(target),
            LifecycleTransition::Complete(target)
            | LifecycleTransition::Fail(target)
            | LifecycleTransition::Cancel(target) => self.apply_settle(target),
        }
    }

    fn apply_start(&self, target: StreamTarget) -> TransitionResult {
        match self {
            Self::Streaming { target: active, .. } => Err(TransitionRejection::AlreadyStreaming {
                active: *active,
                attempted: target,
            }),
            Self::Idle => Ok(Self::Streaming {
                target,
                phase: TurnPhase::AwaitingFirstFragment,
            }),
        }
    }

    fn apply_first_fragment(&self, target: StreamTarget) -> TransitionResult {
        match self {
            Self::Streaming {
                target: active,
                phase,
            } if *active == target => match phase {
                TurnPhase::AwaitingFirstFragment => Ok(Self::Streaming {
                    target,
                    phase: TurnPhase::Extending,
                }),
                TurnPhase::Extending => Err(TransitionRejection::AssistantTurnAlreadyOpen(target)),
            },
            Self::Streaming { target: active, .. } => Err(TransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle => Err(TransitionRejection::NoActiveStream),
        }
    }

    fn apply_settle(&self, target: StreamTarget) -> TransitionResult {
        match self {
            Self::Streaming { target: active, .. } if *active == target => Ok(Self::Idle),
            Self::Streaming { target: active, .. } => Err(TransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle => Err(TransitionRejection::NoActiveStream),
        }
    }
}
