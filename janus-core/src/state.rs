//! Call state machine for one video-call plugin handle.

use serde::Serialize;

/// Current state of the handle's call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Attached (or not yet), but no username registered.
    #[default]
    Unregistered,
    /// Registered and idle.
    ReadyToCall,
    /// Outgoing call: offer created and sent, waiting for `accepted`.
    Calling,
    /// Incoming call: remote offer held, waiting for `answer()`/`decline()`.
    IncomingCall,
    /// Media negotiated in both directions.
    InCall,
}

impl CallState {
    pub fn is_in_call(&self) -> bool {
        matches!(self, Self::InCall)
    }

    pub fn can_call(&self) -> bool {
        matches!(self, Self::ReadyToCall)
    }

    pub fn can_decline(&self) -> bool {
        matches!(self, Self::Calling | Self::IncomingCall | Self::InCall)
    }
}

/// Inputs that move a [`CallState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    /// Plugin event `registered`.
    Registered,
    /// Local `call()`.
    LocalCall,
    /// Plugin event `accepted`.
    RemoteAccepted,
    /// Plugin event `incomingcall`.
    IncomingCall,
    /// Local `answer()`.
    LocalAnswer,
    /// Local `decline()`.
    LocalDecline,
    /// Plugin event `hangup`.
    RemoteHangup,
    /// Media capture or offer/answer negotiation failed mid-call.
    NegotiationFailed,
    /// The gateway session went away.
    SessionLost,
}

impl CallTransition {
    /// Transitions after which the current peer connection and sampler are
    /// released.
    pub fn ends_call(self) -> bool {
        matches!(
            self,
            Self::IncomingCall
                | Self::LocalDecline
                | Self::RemoteHangup
                | Self::NegotiationFailed
                | Self::SessionLost
        )
    }
}

/// Computes the state after `transition`, or rejects it.
pub fn apply_transition(
    current: CallState,
    transition: CallTransition,
) -> Result<CallState, InvalidTransition> {
    use CallState::*;
    use CallTransition as T;

    let next = match (current, transition) {
        (Unregistered | ReadyToCall, T::Registered) => ReadyToCall,
        (ReadyToCall, T::LocalCall) => Calling,
        // The callee also receives `accepted` once its own answer went out.
        (Calling | InCall, T::RemoteAccepted) => InCall,
        (ReadyToCall | Calling | IncomingCall | InCall, T::IncomingCall) => IncomingCall,
        (IncomingCall, T::LocalAnswer) => InCall,
        (Calling | IncomingCall | InCall, T::LocalDecline) => ReadyToCall,
        (ReadyToCall | Calling | IncomingCall | InCall, T::RemoteHangup) => ReadyToCall,
        (Calling | InCall, T::NegotiationFailed) => ReadyToCall,
        (_, T::SessionLost) => Unregistered,
        (current, attempted) => {
            return Err(InvalidTransition { current, attempted });
        }
    };
    Ok(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {attempted:?} in state {current:?}")]
pub struct InvalidTransition {
    pub current: CallState,
    pub attempted: CallTransition,
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallTransition as T;

    fn run(start: CallState, steps: &[CallTransition]) -> Result<CallState, InvalidTransition> {
        steps
            .iter()
            .try_fold(start, |state, step| apply_transition(state, *step))
    }

    /// Unregistered → ReadyToCall → Calling → InCall → ReadyToCall
    #[test]
    fn test_outgoing_call_flow() {
        let state = run(
            CallState::Unregistered,
            &[T::Registered, T::LocalCall, T::RemoteAccepted],
        )
        .unwrap();
        assert!(state.is_in_call());

        let state = apply_transition(state, T::RemoteHangup).unwrap();
        assert_eq!(state, CallState::ReadyToCall);
    }

    /// ReadyToCall → IncomingCall → InCall, then the late `accepted` is a no-op.
    #[test]
    fn test_incoming_call_flow() {
        let state = run(
            CallState::ReadyToCall,
            &[T::IncomingCall, T::LocalAnswer, T::RemoteAccepted],
        )
        .unwrap();
        assert_eq!(state, CallState::InCall);
    }

    #[test]
    fn test_decline_from_every_call_state() {
        for start in [CallState::Calling, CallState::IncomingCall, CallState::InCall] {
            assert!(start.can_decline());
            assert_eq!(
                apply_transition(start, T::LocalDecline).unwrap(),
                CallState::ReadyToCall
            );
        }
        assert!(apply_transition(CallState::ReadyToCall, T::LocalDecline).is_err());
    }

    #[test]
    fn test_double_answer_is_rejected() {
        let state = run(CallState::ReadyToCall, &[T::IncomingCall, T::LocalAnswer]).unwrap();
        let err = apply_transition(state, T::LocalAnswer).unwrap_err();
        assert_eq!(err.current, CallState::InCall);
        assert_eq!(err.attempted, T::LocalAnswer);
    }

    #[test]
    fn test_call_requires_registration() {
        assert!(!CallState::Unregistered.can_call());
        assert!(apply_transition(CallState::Unregistered, T::LocalCall).is_err());
        assert!(apply_transition(CallState::Unregistered, T::IncomingCall).is_err());
        assert!(apply_transition(CallState::Calling, T::LocalCall).is_err());
    }

    #[test]
    fn test_hangup_after_local_decline_is_accepted() {
        // The gateway confirms our own hangup with a `hangup` event.
        let state = run(CallState::IncomingCall, &[T::LocalDecline, T::RemoteHangup]).unwrap();
        assert_eq!(state, CallState::ReadyToCall);
    }

    #[test]
    fn test_negotiation_failure_reverts() {
        assert_eq!(
            apply_transition(CallState::Calling, T::NegotiationFailed).unwrap(),
            CallState::ReadyToCall
        );
        assert_eq!(
            apply_transition(CallState::InCall, T::NegotiationFailed).unwrap(),
            CallState::ReadyToCall
        );
        assert!(apply_transition(CallState::ReadyToCall, T::NegotiationFailed).is_err());
    }

    #[test]
    fn test_session_lost_always_unregisters() {
        for start in [
            CallState::Unregistered,
            CallState::ReadyToCall,
            CallState::Calling,
            CallState::IncomingCall,
            CallState::InCall,
        ] {
            assert_eq!(
                apply_transition(start, T::SessionLost).unwrap(),
                CallState::Unregistered
            );
        }
    }

    #[test]
    fn test_only_teardown_transitions_end_the_call() {
        assert!(T::IncomingCall.ends_call());
        assert!(T::LocalDecline.ends_call());
        assert!(T::SessionLost.ends_call());
        assert!(!T::LocalCall.ends_call());
        assert!(!T::LocalAnswer.ends_call());
        assert!(!T::RemoteAccepted.ends_call());
        assert!(!T::Registered.ends_call());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = apply_transition(CallState::ReadyToCall, T::LocalAnswer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid transition LocalAnswer in state ReadyToCall"
        );
    }
}
