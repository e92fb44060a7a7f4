//! Connection lifecycle state machine.
//!
//! ```text
//! Idle -> Connecting -> Open -> Closing -> Closed
//!              |          |
//!              +----------+--> Failed
//! ```
//!
//! `Closed` and `Failed` are terminal. Transitions are compare-and-swap so the
//! reader task and the caller can race on teardown without double-closing.

use std::sync::atomic::{AtomicU8, Ordering};

use strum::{Display, FromRepr};

/// Lifecycle state of a [`CommentSession`](crate::CommentSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
    Failed = 5,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Shared, lock-free holder of the current [`SessionState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Failed)
    }

    /// `Idle -> Connecting`.
    pub fn begin_connect(&self) -> bool {
        self.transition(&[SessionState::Idle], SessionState::Connecting)
    }

    /// `Connecting -> Open`, entered only after the handshake was written.
    pub fn mark_open(&self) -> bool {
        self.transition(&[SessionState::Connecting], SessionState::Open)
    }

    /// `Open -> Closing`. Returns `false` if the session was not open, which
    /// makes repeated cancellation a no-op.
    pub fn begin_close(&self) -> bool {
        self.transition(&[SessionState::Open], SessionState::Closing)
    }

    /// `Closing -> Closed` (or `Open -> Closed` when the peer hung up).
    pub fn finish_close(&self) -> bool {
        self.transition(
            &[SessionState::Open, SessionState::Closing],
            SessionState::Closed,
        )
    }

    /// `Connecting | Open -> Failed`.
    pub fn fail(&self) -> bool {
        self.transition(
            &[SessionState::Connecting, SessionState::Open],
            SessionState::Failed,
        )
    }

    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !from.iter().any(|s| *s as u8 == current) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), SessionState::Idle);

        assert!(lifecycle.begin_connect());
        assert!(lifecycle.mark_open());
        assert_eq!(lifecycle.state(), SessionState::Open);

        assert!(lifecycle.begin_close());
        assert!(!lifecycle.begin_close());
        assert!(lifecycle.finish_close());
        assert!(!lifecycle.finish_close());
        assert_eq!(lifecycle.state(), SessionState::Closed);
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn test_open_requires_connecting() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.mark_open());
        assert_eq!(lifecycle.state(), SessionState::Idle);
    }

    #[test]
    fn test_failed_is_terminal() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect();
        lifecycle.mark_open();
        assert!(lifecycle.fail());

        assert!(!lifecycle.begin_close());
        assert!(!lifecycle.finish_close());
        assert!(!lifecycle.fail());
        assert_eq!(lifecycle.state(), SessionState::Failed);
    }

    #[test]
    fn test_fail_while_connecting() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect();
        assert!(lifecycle.fail());
        assert!(!lifecycle.mark_open());
    }

    #[test]
    fn test_no_failure_after_close_started() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect();
        lifecycle.mark_open();
        lifecycle.begin_close();
        assert!(!lifecycle.fail());
        assert_eq!(lifecycle.state(), SessionState::Closing);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }
}
