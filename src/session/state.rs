//! Session lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a capture session is in its lifecycle
///
/// `Idle -> Arming -> Waiting -> Capturing -> Decoding -> Ready`, with
/// `Idle` reachable from anywhere on stop and `Error` from anywhere on an
/// unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Arming,
    Waiting,
    Capturing,
    Decoding,
    Ready,
    Error,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Idle) | (_, Error) => true,
            (Idle, Arming) | (Arming, Waiting) | (Waiting, Capturing) | (Capturing, Decoding) | (Decoding, Ready) => {
                true
            }
            _ => false,
        }
    }

    /// A capture or decode is in flight
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Arming | SessionState::Waiting | SessionState::Capturing | SessionState::Decoding
        )
    }

    /// The decoder stack may only change while nothing runs
    pub fn allows_stack_changes(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Arming => "arming",
            SessionState::Waiting => "waiting",
            SessionState::Capturing => "capturing",
            SessionState::Decoding => "decoding",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn test_forward_path() {
        let path = [Idle, Arming, Waiting, Capturing, Decoding, Ready];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Idle.can_transition_to(Capturing));
        assert!(!Waiting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Arming));
    }

    #[test]
    fn test_stop_and_failure_from_anywhere() {
        for state in [Idle, Arming, Waiting, Capturing, Decoding, Ready, Error] {
            assert!(state.can_transition_to(Idle));
            assert!(state.can_transition_to(Error));
        }
    }

    #[test]
    fn test_stack_changes_only_when_quiet() {
        assert!(Idle.allows_stack_changes());
        assert!(Ready.allows_stack_changes());
        assert!(!Decoding.allows_stack_changes());
        assert!(!Error.allows_stack_changes());
        assert!(Capturing.is_active());
        assert!(!Ready.is_active());
    }
}
