//! Component state machine.

use std::fmt;

/// State of a codec component.
///
/// Components move through these states in response to commands; the
/// authoritative copy is only updated once the driver confirms a transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentState {
    /// Component is unusable (not opened, or failed).
    #[default]
    Invalid = 0,

    /// Component is loaded, no buffers allocated.
    Loaded = 1,

    /// Buffers are allocated, no processing.
    Idle = 2,

    /// Component is processing buffers.
    Executing = 3,

    /// Processing is suspended; buffers stay with their owners.
    Pause = 4,
}

impl ComponentState {
    /// Whether buffers may be exchanged with the component in this state.
    pub fn can_process(&self) -> bool {
        matches!(self, Self::Executing | Self::Pause)
    }

    /// Whether a transition to `new_state` may be requested from this state.
    pub fn can_transition_to(&self, new_state: Self) -> bool {
        use ComponentState::*;
        matches!(
            (self, new_state),
            (Invalid, Loaded) |
            (Loaded, Idle) |
            (Idle, Loaded) | (Idle, Executing) |
            (Executing, Idle) | (Executing, Pause) |
            (Pause, Executing) | (Pause, Idle)
        )
    }

    /// State name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Loaded => "Loaded",
            Self::Idle => "Idle",
            Self::Executing => "Executing",
            Self::Pause => "Pause",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComponentState::*;

    #[test]
    fn test_forward_path() {
        assert!(Invalid.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Executing));
    }

    #[test]
    fn test_pause_and_teardown() {
        assert!(Executing.can_transition_to(Pause));
        assert!(Pause.can_transition_to(Executing));
        assert!(Pause.can_transition_to(Idle));
        assert!(Executing.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Loaded));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Loaded.can_transition_to(Executing));
        assert!(!Loaded.can_transition_to(Pause));
        assert!(!Idle.can_transition_to(Pause));
        assert!(!Executing.can_transition_to(Loaded));
        assert!(!Executing.can_transition_to(Executing));
        assert!(!Invalid.can_transition_to(Idle));
    }

    #[test]
    fn test_can_process() {
        assert!(Executing.can_process());
        assert!(Pause.can_process());
        assert!(!Idle.can_process());
        assert!(!Loaded.can_process());
    }

    #[test]
    fn test_display() {
        assert_eq!(Executing.to_string(), "Executing");
        assert_eq!(Invalid.to_string(), "Invalid");
    }
}
