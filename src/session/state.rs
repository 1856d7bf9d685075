//! Session lifecycle state machine.

/// Lifecycle state of a shell session.
///
/// The happy path runs `Uninitialized → Probing → (UserResolution) →
/// DialectDetected → Running → Closed`. `Failed` is an absorbing state
/// reachable from every live state, including `Running` when the
/// underlying process dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No channel opened yet.
    #[default]
    Uninitialized,
    /// Transient probe shell is driving discovery.
    Probing,
    /// Resolving the configured user against the target's user database.
    UserResolution,
    /// The richest available shell dialect has been selected.
    DialectDetected,
    /// The negotiated session is live and can execute commands.
    Running,
    /// Session was closed and its resources released.
    Closed,
    /// Session failed; only closing is possible.
    Failed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Uninitialized, Probing)
                | (Probing, UserResolution)
                | (Probing, DialectDetected)
                | (UserResolution, DialectDetected)
                | (DialectDetected, Running)
                | (Running, Closed)
                | (Failed, Closed)
                | (Uninitialized, Failed)
                | (Probing, Failed)
                | (UserResolution, Failed)
                | (DialectDetected, Failed)
                | (Running, Failed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::RelayError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Check if the session can accept commands.
    pub fn can_execute(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_user_resolution() {
        let mut state = SessionState::Uninitialized;
        assert!(state.transition_to(SessionState::Probing).is_ok());
        assert!(state.transition_to(SessionState::UserResolution).is_ok());
        assert!(state.transition_to(SessionState::DialectDetected).is_ok());
        assert!(state.transition_to(SessionState::Running).is_ok());
        assert!(state.transition_to(SessionState::Closed).is_ok());
        assert!(state.is_terminal());
    }

    #[test]
    fn test_user_resolution_is_optional() {
        let mut state = SessionState::Probing;
        assert!(state.transition_to(SessionState::DialectDetected).is_ok());
    }

    #[test]
    fn test_failed_reachable_from_every_live_state() {
        for from in [
            SessionState::Uninitialized,
            SessionState::Probing,
            SessionState::UserResolution,
            SessionState::DialectDetected,
            SessionState::Running,
        ] {
            let mut state = from;
            assert!(
                state.transition_to(SessionState::Failed).is_ok(),
                "Failed not reachable from {:?}",
                from
            );
        }
    }

    #[test]
    fn test_failed_absorbs() {
        let mut state = SessionState::Failed;
        assert!(state.transition_to(SessionState::Running).is_err());
        assert!(state.transition_to(SessionState::Probing).is_err());
        // A failed session can still release its resources
        assert!(state.transition_to(SessionState::Closed).is_ok());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = SessionState::Closed;
        assert!(state.transition_to(SessionState::Running).is_err());
        assert!(state.transition_to(SessionState::Failed).is_err());
    }

    #[test]
    fn test_invalid_skip() {
        let mut state = SessionState::Uninitialized;
        assert!(state.transition_to(SessionState::Running).is_err());
        assert_eq!(state, SessionState::Uninitialized);
    }

    #[test]
    fn test_can_execute() {
        assert!(SessionState::Running.can_execute());
        assert!(!SessionState::Probing.can_execute());
        assert!(!SessionState::Closed.can_execute());
        assert!(!SessionState::Failed.can_execute());
    }

    #[test]
    fn test_default() {
        assert_eq!(SessionState::default(), SessionState::Uninitialized);
    }
}
