//! Lifecycle of one topic connection.
//!
//! ```text
//! Connecting --Opened--> Open
//! Connecting --Failed--> Reconnecting
//! Open       --Failed--> Reconnecting
//! Reconnecting --RetryElapsed--> Connecting
//! any        --Closed--> Closed
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use thiserror::Error;

/// Lifecycle of one topic subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The hub accepted the subscription.
    Opened,
    Failed,
    RetryElapsed,
    Closed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{event:?} is not valid while {state}")]
pub struct InvalidTransition {
    pub state: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    /// State after `event`.
    ///
    /// # Errors
    /// Returns [`InvalidTransition`] when `event` cannot happen in this state.
    pub fn apply(self, event: ConnectionEvent) -> Result<Self, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::Closed) => Ok(S::Closed),
            (S::Connecting, E::Opened) => Ok(S::Open),
            (S::Connecting | S::Open, E::Failed) => Ok(S::Reconnecting),
            (S::Reconnecting, E::RetryElapsed) => Ok(S::Connecting),
            (state, event) => Err(InvalidTransition { state, event }),
        }
    }

    #[must_use]
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Open
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent as E;
    use ConnectionState as S;

    #[test]
    fn failure_leads_back_to_connecting() {
        let state = S::Connecting
            .apply(E::Opened)
            .and_then(|s| s.apply(E::Failed))
            .and_then(|s| s.apply(E::RetryElapsed))
            .unwrap();
        assert_eq!(state, S::Connecting);
    }

    #[test]
    fn close_is_accepted_everywhere() {
        for state in [S::Connecting, S::Open, S::Reconnecting, S::Closed] {
            assert_eq!(state.apply(E::Closed), Ok(S::Closed));
        }
    }

    #[test]
    fn rejects_impossible_transitions() {
        assert!(S::Open.apply(E::Opened).is_err());
        assert!(S::Open.apply(E::RetryElapsed).is_err());
        assert!(S::Reconnecting.apply(E::Opened).is_err());
        assert!(S::Closed.apply(E::RetryElapsed).is_err());
        assert_eq!(
            S::Closed.apply(E::Failed).unwrap_err().to_string(),
            "Failed is not valid while closed"
        );
    }
}
