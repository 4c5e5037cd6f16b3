//! Invocation state machine.
//!
//! ```text
//!               next                       handle returns
//! Unhandled ──────────────► NextCalled   ─────────────────► Complete(Delegated)
//!     │     send_response
//!     └───────────────────► ResponseSent ─────────────────► Complete(Responded)
//!
//! any state ── trap ──► Trapped
//! ```
//!
//! `next` and `send_response` are mutually exclusive: whichever comes second
//! is a protocol violation. Returning from `handle` while still `Unhandled`
//! is a protocol violation too.

use http_wasm_common::ProtocolError;

/// How the guest terminated an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The guest called `next`.
    Delegated,
    /// The guest called `send_response`.
    Responded,
}

/// Where a single invocation stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvocationState {
    /// Neither `next` nor `send_response` has been called.
    #[default]
    Unhandled,
    /// The guest delegated to the downstream handler.
    NextCalled,
    /// The guest answered the request itself.
    ResponseSent,
    /// `handle` returned after terminating the exchange.
    Complete(Outcome),
    /// The invocation was aborted.
    Trapped,
}

impl InvocationState {
    /// The terminal outcome reached so far, if any.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Self::NextCalled | Self::Complete(Outcome::Delegated) => Some(Outcome::Delegated),
            Self::ResponseSent | Self::Complete(Outcome::Responded) => Some(Outcome::Responded),
            Self::Unhandled | Self::Trapped => None,
        }
    }

    /// Transition for a `next` call.
    pub fn on_next(&mut self) -> Result<(), ProtocolError> {
        match (*self, self.outcome()) {
            (Self::Unhandled, _) => {
                *self = Self::NextCalled;
                Ok(())
            }
            (_, Some(Outcome::Responded)) => Err(ProtocolError::NextAfterResponse),
            _ => Err(ProtocolError::DuplicateNext),
        }
    }

    /// Transition for a `send_response` call.
    pub fn on_send_response(&mut self) -> Result<(), ProtocolError> {
        match (*self, self.outcome()) {
            (Self::Unhandled, _) => {
                *self = Self::ResponseSent;
                Ok(())
            }
            (_, Some(Outcome::Delegated)) => Err(ProtocolError::ResponseAfterNext),
            _ => Err(ProtocolError::DuplicateResponse),
        }
    }

    /// Close the invocation after `handle` returned normally.
    pub fn complete(&mut self) -> Result<Outcome, ProtocolError> {
        match *self {
            Self::NextCalled => {
                *self = Self::Complete(Outcome::Delegated);
                Ok(Outcome::Delegated)
            }
            Self::ResponseSent => {
                *self = Self::Complete(Outcome::Responded);
                Ok(Outcome::Responded)
            }
            Self::Complete(outcome) => Ok(outcome),
            Self::Unhandled | Self::Trapped => {
                *self = Self::Trapped;
                Err(ProtocolError::Unhandled)
            }
        }
    }

    /// Abort the invocation.
    pub fn trap(&mut self) {
        *self = Self::Trapped;
    }

    /// The request may still be rewritten (path, body).
    pub fn request_mutable(self) -> bool {
        self == Self::Unhandled
    }

    /// The downstream response exists and may be read or rewritten.
    pub fn response_available(self) -> bool {
        self == Self::NextCalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_then_complete() {
        let mut state = InvocationState::default();
        assert!(state.request_mutable());
        assert!(!state.response_available());

        state.on_next().unwrap();
        assert_eq!(state, InvocationState::NextCalled);
        assert!(!state.request_mutable());
        assert!(state.response_available());

        assert_eq!(state.complete(), Ok(Outcome::Delegated));
        assert_eq!(state, InvocationState::Complete(Outcome::Delegated));
    }

    #[test]
    fn test_send_response_then_complete() {
        let mut state = InvocationState::default();
        state.on_send_response().unwrap();
        assert!(!state.response_available());
        assert_eq!(state.complete(), Ok(Outcome::Responded));
    }

    #[test]
    fn test_next_and_respond_are_exclusive() {
        let mut state = InvocationState::default();
        state.on_next().unwrap();
        assert_eq!(state.on_send_response(), Err(ProtocolError::ResponseAfterNext));
        assert_eq!(state.on_next(), Err(ProtocolError::DuplicateNext));
        // The first call still decides the outcome
        assert_eq!(state, InvocationState::NextCalled);

        let mut state = InvocationState::default();
        state.on_send_response().unwrap();
        assert_eq!(state.on_next(), Err(ProtocolError::NextAfterResponse));
        assert_eq!(
            state.on_send_response(),
            Err(ProtocolError::DuplicateResponse)
        );
    }

    #[test]
    fn test_unhandled_is_protocol_error() {
        let mut state = InvocationState::default();
        assert_eq!(state.complete(), Err(ProtocolError::Unhandled));
        assert_eq!(state, InvocationState::Trapped);
    }

    #[test]
    fn test_trap_from_any_state() {
        for mut state in [
            InvocationState::Unhandled,
            InvocationState::NextCalled,
            InvocationState::ResponseSent,
        ] {
            state.trap();
            assert_eq!(state, InvocationState::Trapped);
            assert_eq!(state.outcome(), None);
            assert!(!state.request_mutable());
        }
    }
}
