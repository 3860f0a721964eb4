//! Per-message dispatch state machine.
//!
//! ```text
//! Received ─► RouteMatched ─► MiddlewareRunning ─► HandlerInvoked ─► Done
//!    │              │                  │                  │
//!    └──────────────┴──────────────────┴──► Error ◄───────┘
//! ```
//!
//! `MiddlewareRunning` also goes straight to `Done` on a short-circuit.
//! Middleware failures are contained and never move a message to `Error`;
//! from `MiddlewareRunning` it is reached only when the terminal cannot
//! resolve its handler.

use std::fmt;

/// Where a message is in its dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchState {
    /// Frame arrived and decoded.
    Received,
    /// A route matched and its middleware resolved.
    RouteMatched,
    /// The pipeline is executing.
    MiddlewareRunning,
    /// The route handler was called.
    HandlerInvoked,
    /// Processing finished (completed or short-circuited).
    Done,
    /// Dispatch failed; the message was dropped.
    Error,
}

impl DispatchState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use DispatchState::{Done, Error, HandlerInvoked, MiddlewareRunning, Received, RouteMatched};
        matches!(
            (self, next),
            (Received, RouteMatched | Error)
                | (RouteMatched, MiddlewareRunning | Error)
                | (MiddlewareRunning, HandlerInvoked | Done | Error)
                | (HandlerInvoked, Done | Error)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RouteMatched => "route_matched",
            Self::MiddlewareRunning => "middleware_running",
            Self::HandlerInvoked => "handler_invoked",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the states a message passed through.
#[derive(Debug)]
pub(crate) struct StateTracker {
    history: Vec<DispatchState>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            history: vec![DispatchState::Received],
        }
    }

    pub(crate) fn current(&self) -> DispatchState {
        self.history
            .last()
            .copied()
            .unwrap_or(DispatchState::Received)
    }

    /// Advance, ignoring illegal transitions (logged at debug).
    pub(crate) fn advance(&mut self, next: DispatchState) {
        let current = self.current();
        if current.can_transition_to(next) {
            tracing::trace!(from = %current, to = %next, "dispatch state");
            self.history.push(next);
        } else {
            tracing::debug!(from = %current, to = %next, "ignored illegal dispatch transition");
        }
    }

    pub(crate) fn into_history(self) -> Vec<DispatchState> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DispatchState::*;

    #[test]
    fn happy_path_transitions() {
        let path = [Received, RouteMatched, MiddlewareRunning, HandlerInvoked, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn error_reachable_from_every_live_state() {
        for from in [Received, RouteMatched, MiddlewareRunning, HandlerInvoked] {
            assert!(from.can_transition_to(Error), "{from} -> error");
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for next in [Received, RouteMatched, MiddlewareRunning, HandlerInvoked, Done, Error] {
            assert!(!Done.can_transition_to(next));
            assert!(!Error.can_transition_to(next));
        }
        assert!(Done.is_terminal());
        assert!(!Received.is_terminal());
    }

    #[test]
    fn short_circuit_skips_handler() {
        assert!(MiddlewareRunning.can_transition_to(Done));
        assert!(!RouteMatched.can_transition_to(HandlerInvoked));
    }

    #[test]
    fn tracker_ignores_illegal_moves() {
        let mut tracker = StateTracker::new();
        tracker.advance(HandlerInvoked);
        assert_eq!(tracker.current(), Received);
        tracker.advance(RouteMatched);
        tracker.advance(MiddlewareRunning);
        tracker.advance(Done);
        assert_eq!(
            tracker.into_history(),
            vec![Received, RouteMatched, MiddlewareRunning, Done]
        );
    }
}
