use thiserror::Error;
use uuid::Uuid;

use crate::state::session::Session;

/// Workflow phase of a session. Never stored: it is read off
/// `currentItemId` and `votesRevealed` of the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No item is open for voting.
    NoItemSelected,
    /// Votes on the current item are being collected and stay hidden.
    Voting {
        /// Item open for voting.
        item_id: Uuid,
    },
    /// Votes on the current item are visible and the aggregate is frozen.
    Revealed {
        /// Item whose votes were revealed.
        item_id: Uuid,
    },
}

/// Events that move a session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Open an item for voting, explicitly or through auto-selection on add.
    SelectItem(Uuid),
    /// A participant casts or changes a vote.
    CastVote,
    /// Facilitator reveals the votes on the current item.
    RevealVotes,
    /// Facilitator advances to the following item after a reveal.
    NextItem(Uuid),
    /// The current item disappeared and nothing can replace it.
    ClearSelection,
}

/// Error returned when an event is not allowed from the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the session was in.
    pub from: SessionPhase,
    /// Rejected event.
    pub event: SessionEvent,
}

impl SessionPhase {
    /// Derive the phase of a snapshot.
    pub fn of(session: &Session) -> Self {
        match session.current_item_id {
            None => SessionPhase::NoItemSelected,
            Some(item_id) if session.votes_revealed => SessionPhase::Revealed { item_id },
            Some(item_id) => SessionPhase::Voting { item_id },
        }
    }

    /// Item open in this phase, if any.
    pub fn item_id(self) -> Option<Uuid> {
        match self {
            SessionPhase::NoItemSelected => None,
            SessionPhase::Voting { item_id } | SessionPhase::Revealed { item_id } => Some(item_id),
        }
    }

    /// Compute the phase reached by applying `event`.
    ///
    /// Only the phase graph is checked here; data guards (everyone voted, a
    /// later item exists) belong to the caller.
    pub fn transition(self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self, event) {
            (_, SessionEvent::SelectItem(item_id)) => SessionPhase::Voting { item_id },
            (SessionPhase::Voting { item_id }, SessionEvent::CastVote) => {
                SessionPhase::Voting { item_id }
            }
            (SessionPhase::Voting { item_id }, SessionEvent::RevealVotes) => {
                SessionPhase::Revealed { item_id }
            }
            (SessionPhase::Revealed { .. }, SessionEvent::NextItem(item_id)) => {
                SessionPhase::Voting { item_id }
            }
            (
                SessionPhase::Voting { .. } | SessionPhase::Revealed { .. },
                SessionEvent::ClearSelection,
            ) => SessionPhase::NoItemSelected,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_round_through_two_items() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let phase = SessionPhase::NoItemSelected
            .transition(SessionEvent::SelectItem(first))
            .unwrap();
        assert_eq!(phase, SessionPhase::Voting { item_id: first });

        let phase = phase.transition(SessionEvent::CastVote).unwrap();
        let phase = phase.transition(SessionEvent::RevealVotes).unwrap();
        assert_eq!(phase, SessionPhase::Revealed { item_id: first });

        let phase = phase.transition(SessionEvent::NextItem(second)).unwrap();
        assert_eq!(phase, SessionPhase::Voting { item_id: second });

        let phase = phase.transition(SessionEvent::ClearSelection).unwrap();
        assert_eq!(phase, SessionPhase::NoItemSelected);
    }

    #[test]
    fn select_is_allowed_from_every_phase() {
        let item = Uuid::new_v4();
        let other = Uuid::new_v4();
        for from in [
            SessionPhase::NoItemSelected,
            SessionPhase::Voting { item_id: other },
            SessionPhase::Revealed { item_id: other },
        ] {
            assert_eq!(
                from.transition(SessionEvent::SelectItem(item)),
                Ok(SessionPhase::Voting { item_id: item })
            );
        }
    }

    #[test]
    fn voting_after_reveal_is_rejected() {
        let from = SessionPhase::Revealed {
            item_id: Uuid::new_v4(),
        };
        let err = from.transition(SessionEvent::CastVote).unwrap_err();
        assert_eq!(err.from, from);
        assert_eq!(err.event, SessionEvent::CastVote);
    }

    #[test]
    fn next_item_requires_a_reveal() {
        let from = SessionPhase::Voting {
            item_id: Uuid::new_v4(),
        };
        assert!(from.transition(SessionEvent::NextItem(Uuid::new_v4())).is_err());
        assert!(
            SessionPhase::NoItemSelected
                .transition(SessionEvent::RevealVotes)
                .is_err()
        );
        assert!(
            SessionPhase::NoItemSelected
                .transition(SessionEvent::ClearSelection)
                .is_err()
        );
    }
}
