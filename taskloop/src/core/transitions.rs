//! Forward-only status transitions.

use std::fmt;

use crate::core::task::Status;

/// Rejected status change. Callers may `downcast_ref` this out of an `anyhow::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Option<Status>,
    pub to: Status,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.map(Status::as_str).unwrap_or("absent");
        write!(f, "illegal status transition {from} -> {}", self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Allow only absent/backlog -> active -> {completed, suspended, stopped}.
pub fn validate_transition(from: Option<Status>, to: Status) -> Result<(), TransitionError> {
    let ok = match (from, to) {
        (None | Some(Status::Backlog), Status::Active) => true,
        (Some(Status::Active), Status::Completed | Status::Suspended | Status::Stopped) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 5] = [
        Status::Backlog,
        Status::Active,
        Status::Suspended,
        Status::Completed,
        Status::Stopped,
    ];

    #[test]
    fn only_forward_edges_are_allowed() {
        let mut allowed = Vec::new();
        for from in std::iter::once(None).chain(ALL.iter().copied().map(Some)) {
            for to in ALL {
                if validate_transition(from, to).is_ok() {
                    allowed.push((from, to));
                }
            }
        }
        assert_eq!(
            allowed,
            vec![
                (None, Status::Active),
                (Some(Status::Backlog), Status::Active),
                (Some(Status::Active), Status::Suspended),
                (Some(Status::Active), Status::Completed),
                (Some(Status::Active), Status::Stopped),
            ]
        );
    }

    #[test]
    fn terminal_states_never_leave() {
        for to in ALL {
            assert!(validate_transition(Some(Status::Completed), to).is_err());
            assert!(validate_transition(Some(Status::Stopped), to).is_err());
        }
        let err = validate_transition(Some(Status::Active), Status::Active).unwrap_err();
        assert_eq!(err.to_string(), "illegal status transition active -> active");
    }
}
