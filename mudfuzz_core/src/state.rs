use std::fmt;

/// The login/fuzzing progression of a session.
///
/// States only move forward: `Start -> Connecting -> AwaitUser -> AwaitPass -> Fuzzing`.
/// Pausing does not change the operating state; it is recorded beside it in [`FuzzerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingState {
    Start,
    Connecting,
    AwaitUser,
    AwaitPass,
    Fuzzing,
}

impl OperatingState {
    pub fn name(&self) -> &'static str {
        match self {
            OperatingState::Start => "START",
            OperatingState::Connecting => "CONNECTING",
            OperatingState::AwaitUser => "AWAIT_USER",
            OperatingState::AwaitPass => "AWAIT_PASS",
            OperatingState::Fuzzing => "FUZZING",
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why fuzzing was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseCause {
    UserRequested,
    ErrorDetected,
}

impl PauseCause {
    pub fn name(&self) -> &'static str {
        match self {
            PauseCause::UserRequested => "USER_PAUSE",
            PauseCause::ErrorDetected => "ERROR_PAUSE",
        }
    }
}

/// An active pause: the cause plus the operating state to restore on unpause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pause {
    pub cause: PauseCause,
    pub resume_target: OperatingState,
}

/// Full engine state. A paused engine always carries exactly one cause and a
/// non-paused resume target, so nested pauses cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuzzerState {
    Active(OperatingState),
    Paused(Pause),
}

impl FuzzerState {
    pub fn is_paused(&self) -> bool {
        matches!(self, FuzzerState::Paused(_))
    }

    /// The operating state, or the resume target while paused.
    pub fn operating(&self) -> OperatingState {
        match self {
            FuzzerState::Active(state) => *state,
            FuzzerState::Paused(pause) => pause.resume_target,
        }
    }

    /// Returns `true` only when running (not paused) in `state`.
    pub fn is_active(&self, state: OperatingState) -> bool {
        *self == FuzzerState::Active(state)
    }

    pub fn pause(&self) -> Option<Pause> {
        match self {
            FuzzerState::Active(_) => None,
            FuzzerState::Paused(pause) => Some(*pause),
        }
    }
}

impl Default for FuzzerState {
    fn default() -> Self {
        FuzzerState::Active(OperatingState::Start)
    }
}

impl fmt::Display for FuzzerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzerState::Active(state) => write!(f, "{state}"),
            FuzzerState::Paused(pause) => {
                write!(f, "{} (resume {})", pause.cause.name(), pause.resume_target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_state_reports_resume_target_as_operating_state() {
        let state = FuzzerState::Paused(Pause {
            cause: PauseCause::ErrorDetected,
            resume_target: OperatingState::Fuzzing,
        });
        assert!(state.is_paused());
        assert_eq!(state.operating(), OperatingState::Fuzzing);
        assert!(!state.is_active(OperatingState::Fuzzing));
        assert_eq!(state.to_string(), "ERROR_PAUSE (resume FUZZING)");
    }

    #[test]
    fn default_state_is_active_start() {
        let state = FuzzerState::default();
        assert!(state.is_active(OperatingState::Start));
        assert!(state.pause().is_none());
        assert_eq!(state.to_string(), "START");
    }
}
