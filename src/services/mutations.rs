//! Pure planning of session mutations.
//!
//! Every mutation is computed from the latest snapshot and turned into a
//! partial write naming only the fields it replaces. Nothing here talks to
//! the store, so a plan can be checked without any I/O.

use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::models::SessionPatch,
    services::estimation::aggregate_votes,
    state::{
        session::{
            ItemStatus, MAX_TEXT_LEN, Participant, Session, Vote, WorkItem, items_to_entities,
            participants_to_entities,
        },
        workflow::{InvalidTransition, SessionEvent, SessionPhase},
    },
};

/// Item submitted by the facilitator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    /// Short description, trimmed before it is stored.
    pub title: String,
    /// Ticket URL; blank links are dropped.
    pub link: Option<String>,
}

/// State transition a participant may request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Append items; auto-selects the first one when nothing is current.
    AddItems(Vec<NewItem>),
    /// Open another item for voting.
    SelectItem(Uuid),
    /// Remove an item, moving the selection if it was current.
    DeleteItem(Uuid),
    /// Cast or change the caller's vote.
    Vote(Vote),
    /// Freeze the aggregate on the current item and show every vote.
    RevealVotes,
    /// Advance to the item after the current one.
    NextItem,
    /// Remove a participant from the roster.
    Kick(Uuid),
    /// Nudge a participant who has not voted yet.
    SendNotification(Uuid),
    /// Acknowledge a nudge addressed to the caller.
    ClearNotification,
}

impl Mutation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AddItems(_) => "addItems",
            Mutation::SelectItem(_) => "selectItem",
            Mutation::DeleteItem(_) => "deleteItem",
            Mutation::Vote(_) => "vote",
            Mutation::RevealVotes => "revealVotes",
            Mutation::NextItem => "nextItem",
            Mutation::Kick(_) => "kickParticipant",
            Mutation::SendNotification(_) => "sendNotification",
            Mutation::ClearNotification => "clearNotification",
        }
    }
}

/// Client-local privileges that widen what a participant may do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Privileges {
    /// Secret mode lets any participant send notifications.
    pub secret_mode: bool,
}

/// Why a mutation was refused. Nothing is written in any of these cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// The actor is not on the roster.
    #[error("participant `{participant_id}` is not part of the session")]
    UnknownParticipant { participant_id: Uuid },
    /// The action needs facilitator rights.
    #[error("participant `{participant_id}` is not the facilitator")]
    NotFacilitator { participant_id: Uuid },
    /// Blank or oversized text, or an empty item list.
    #[error("{0}")]
    InvalidInput(String),
    /// No item with this id.
    #[error("item `{item_id}` does not exist")]
    ItemNotFound { item_id: Uuid },
    /// The workflow phase does not allow the action.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Reveal asked for before everyone voted.
    #[error("{pending} participant(s) have not voted yet")]
    NotAllVoted { pending: usize },
    /// The current item is the last one.
    #[error("there is no item after the current one")]
    NoNextItem,
    /// The facilitator cannot be kicked.
    #[error("the facilitator cannot be removed from the session")]
    CannotKickFacilitator,
    /// The target cannot be nudged.
    #[error("participant `{target_id}` cannot be notified: {reason}")]
    InvalidNotificationTarget {
        target_id: Uuid,
        reason: &'static str,
    },
}

/// Build the document of a brand-new session whose only participant is the facilitator.
pub fn new_session(facilitator_name: &str, created_at: i64) -> Result<Session, MutationError> {
    let name = required_text(facilitator_name, "facilitator name")?;
    let facilitator = Participant::new(name.clone(), true);

    Ok(Session {
        id: Uuid::new_v4(),
        facilitator_id: facilitator.id,
        facilitator_name: name,
        items: IndexMap::new(),
        participants: vec![facilitator],
        current_item_id: None,
        votes_revealed: false,
        notify_target_id: None,
        created_at,
        version: 0,
    })
}

/// Append a new non-facilitator participant.
pub fn plan_join(session: &Session, name: &str) -> Result<(Participant, SessionPatch), MutationError> {
    let participant = Participant::new(required_text(name, "participant name")?, false);

    let mut participants = session.participants.clone();
    participants.push(participant.clone());

    let patch = SessionPatch {
        participants: Some(participants_to_entities(&participants)),
        ..SessionPatch::default()
    };
    Ok((participant, patch))
}

/// Plan `mutation` on behalf of `actor` against `session`.
///
/// `Ok(None)` means the request is already satisfied and nothing needs to be
/// written; repeated clicks land there.
pub fn plan(
    session: &Session,
    actor: Uuid,
    mutation: &Mutation,
    privileges: Privileges,
) -> Result<Option<SessionPatch>, MutationError> {
    let Some(caller) = session.participant(actor) else {
        return Err(MutationError::UnknownParticipant {
            participant_id: actor,
        });
    };

    let planner = Planner { session, caller };
    match mutation {
        Mutation::AddItems(items) => planner.add_items(items),
        Mutation::SelectItem(item_id) => planner.select_item(*item_id),
        Mutation::DeleteItem(item_id) => planner.delete_item(*item_id),
        Mutation::Vote(vote) => planner.vote(*vote),
        Mutation::RevealVotes => planner.reveal_votes(),
        Mutation::NextItem => planner.next_item(),
        Mutation::Kick(target_id) => planner.kick(*target_id),
        Mutation::SendNotification(target_id) => planner.send_notification(*target_id, privileges),
        Mutation::ClearNotification => Ok(planner.clear_notification()),
    }
}

struct Planner<'a> {
    session: &'a Session,
    caller: &'a Participant,
}

impl Planner<'_> {
    fn phase(&self) -> SessionPhase {
        SessionPhase::of(self.session)
    }

    fn require_facilitator(&self) -> Result<(), MutationError> {
        if self.session.is_facilitator(self.caller.id) {
            Ok(())
        } else {
            Err(MutationError::NotFacilitator {
                participant_id: self.caller.id,
            })
        }
    }

    /// Patch moving the selection to `current`; votes never survive a change of item.
    fn selection_patch(&self, current: Option<Uuid>) -> SessionPatch {
        SessionPatch {
            current_item_id: Some(current),
            votes_revealed: Some(false),
            participants: Some(participants_to_entities(
                &self.session.participants_without_votes(),
            )),
            ..SessionPatch::default()
        }
    }

    fn add_items(&self, new_items: &[NewItem]) -> Result<Option<SessionPatch>, MutationError> {
        self.require_facilitator()?;
        if new_items.is_empty() {
            return Err(MutationError::InvalidInput(
                "at least one item is required".into(),
            ));
        }

        let mut items = self.session.items.clone();
        let mut first_added = None;
        for new_item in new_items {
            let title = required_text(&new_item.title, "item title")?;
            let link = new_item
                .link
                .as_deref()
                .map(str::trim)
                .filter(|link| !link.is_empty())
                .map(str::to_owned);
            let item = WorkItem::new(title, link);
            first_added.get_or_insert(item.id);
            items.insert(item.id, item);
        }

        let mut patch = match (self.session.current_item_id, first_added) {
            (None, Some(first)) => {
                self.phase().transition(SessionEvent::SelectItem(first))?;
                self.selection_patch(Some(first))
            }
            _ => SessionPatch::default(),
        };
        patch.items = Some(items_to_entities(&items));

        Ok(Some(patch))
    }

    fn select_item(&self, item_id: Uuid) -> Result<Option<SessionPatch>, MutationError> {
        self.require_facilitator()?;
        if !self.session.items.contains_key(&item_id) {
            return Err(MutationError::ItemNotFound { item_id });
        }
        if self.session.current_item_id == Some(item_id) {
            return Ok(None);
        }

        self.phase().transition(SessionEvent::SelectItem(item_id))?;
        Ok(Some(self.selection_patch(Some(item_id))))
    }

    fn delete_item(&self, item_id: Uuid) -> Result<Option<SessionPatch>, MutationError> {
        self.require_facilitator()?;
        let Some(index) = self.session.items.get_index_of(&item_id) else {
            return Ok(None);
        };

        let mut items = self.session.items.clone();
        items.shift_remove_index(index);

        let mut patch = if self.session.current_item_id == Some(item_id) {
            // Successor first, then predecessor, then nothing.
            let replacement = items
                .get_index(index)
                .or_else(|| index.checked_sub(1).and_then(|prev| items.get_index(prev)))
                .map(|(id, _)| *id);

            let event = match replacement {
                Some(next) => SessionEvent::SelectItem(next),
                None => SessionEvent::ClearSelection,
            };
            self.phase().transition(event)?;
            self.selection_patch(replacement)
        } else {
            SessionPatch::default()
        };
        patch.items = Some(items_to_entities(&items));

        Ok(Some(patch))
    }

    fn vote(&self, vote: Vote) -> Result<Option<SessionPatch>, MutationError> {
        if let Vote::Points(points) = vote
            && Vote::points(points).is_none()
        {
            return Err(MutationError::InvalidInput(format!(
                "{points} is not an estimation value"
            )));
        }

        self.phase().transition(SessionEvent::CastVote)?;
        if self.caller.current_vote == Some(vote) {
            return Ok(None);
        }

        let mut participants = self.session.participants.clone();
        for participant in participants.iter_mut() {
            if participant.id == self.caller.id {
                participant.current_vote = Some(vote);
            }
        }

        Ok(Some(SessionPatch {
            participants: Some(participants_to_entities(&participants)),
            ..SessionPatch::default()
        }))
    }

    fn reveal_votes(&self) -> Result<Option<SessionPatch>, MutationError> {
        self.require_facilitator()?;
        let next_phase = self.phase().transition(SessionEvent::RevealVotes)?;
        if !self.session.all_voted() {
            return Err(MutationError::NotAllVoted {
                pending: self.session.pending_voters(),
            });
        }

        let Some(item_id) = next_phase.item_id() else {
            return Ok(None);
        };
        let mut items = self.session.items.clone();
        let Some(item) = items.get_mut(&item_id) else {
            return Err(MutationError::ItemNotFound { item_id });
        };

        let recorded = self
            .session
            .participants
            .iter()
            .filter_map(|participant| {
                let points = participant.current_vote?.numeric()?;
                Some((participant.id, points))
            })
            .collect::<IndexMap<_, _>>();
        let numeric = recorded.values().copied().collect::<Vec<_>>();

        item.status = ItemStatus::Completed;
        item.average_points = Some(aggregate_votes(&numeric));
        item.votes = recorded;

        Ok(Some(SessionPatch {
            items: Some(items_to_entities(&items)),
            votes_revealed: Some(true),
            ..SessionPatch::default()
        }))
    }

    fn next_item(&self) -> Result<Option<SessionPatch>, MutationError> {
        self.require_facilitator()?;
        let next = self
            .session
            .next_item_id()
            .ok_or(MutationError::NoNextItem)?;

        self.phase().transition(SessionEvent::NextItem(next))?;
        Ok(Some(self.selection_patch(Some(next))))
    }

    fn kick(&self, target_id: Uuid) -> Result<Option<SessionPatch>, MutationError> {
        self.require_facilitator()?;
        if self.session.is_facilitator(target_id) {
            return Err(MutationError::CannotKickFacilitator);
        }
        if !self.session.contains_participant(target_id) {
            return Ok(None);
        }

        let participants = self
            .session
            .participants
            .iter()
            .filter(|participant| participant.id != target_id)
            .cloned()
            .collect::<Vec<_>>();

        let mut patch = SessionPatch {
            participants: Some(participants_to_entities(&participants)),
            ..SessionPatch::default()
        };
        if self.session.notify_target_id == Some(target_id) {
            patch.notify_target_id = Some(None);
        }

        Ok(Some(patch))
    }

    fn send_notification(
        &self,
        target_id: Uuid,
        privileges: Privileges,
    ) -> Result<Option<SessionPatch>, MutationError> {
        if !privileges.secret_mode {
            self.require_facilitator()?;
        }
        if target_id == self.caller.id {
            return Err(MutationError::InvalidNotificationTarget {
                target_id,
                reason: "cannot notify yourself",
            });
        }
        let Some(target) = self.session.participant(target_id) else {
            return Err(MutationError::InvalidNotificationTarget {
                target_id,
                reason: "not in the session",
            });
        };
        if target.has_voted() {
            return Err(MutationError::InvalidNotificationTarget {
                target_id,
                reason: "already voted",
            });
        }

        Ok(Some(SessionPatch {
            notify_target_id: Some(Some(target_id)),
            ..SessionPatch::default()
        }))
    }

    fn clear_notification(&self) -> Option<SessionPatch> {
        (self.session.notify_target_id == Some(self.caller.id)).then(|| SessionPatch {
            notify_target_id: Some(None),
            ..SessionPatch::default()
        })
    }
}

fn required_text(raw: &str, what: &str) -> Result<String, MutationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MutationError::InvalidInput(format!("{what} must not be blank")));
    }
    let length = trimmed.chars().count();
    if length > MAX_TEXT_LEN {
        return Err(MutationError::InvalidInput(format!(
            "{what} must be at most {MAX_TEXT_LEN} characters (got {length})"
        )));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::SessionEntity;

    struct Room {
        session: Session,
        pm: Uuid,
        bob: Uuid,
        carol: Uuid,
    }

    impl Room {
        fn new() -> Self {
            let mut session = new_session("Alice", 0).unwrap();
            let pm = session.facilitator_id;
            let (bob, patch) = plan_join(&session, "Bob").unwrap();
            session = apply(&session, patch);
            let (carol, patch) = plan_join(&session, "Carol").unwrap();
            session = apply(&session, patch);
            Self {
                session,
                pm,
                bob: bob.id,
                carol: carol.id,
            }
        }

        fn run(&mut self, actor: Uuid, mutation: Mutation) -> Option<SessionPatch> {
            let patch = plan(&self.session, actor, &mutation, Privileges::default())
                .unwrap_or_else(|err| panic!("{} failed: {err}", mutation.name()));
            if let Some(patch) = &patch {
                self.session = apply(&self.session, patch.clone());
            }
            assert_current_item_is_valid(&self.session);
            patch
        }

        fn try_run(&self, actor: Uuid, mutation: Mutation) -> Result<Option<SessionPatch>, MutationError> {
            plan(&self.session, actor, &mutation, Privileges::default())
        }

        fn add(&mut self, titles: &[&str]) -> Vec<Uuid> {
            let items = titles
                .iter()
                .map(|title| NewItem {
                    title: (*title).to_owned(),
                    link: None,
                })
                .collect();
            let before = self.session.items.len();
            self.run(self.pm, Mutation::AddItems(items));
            self.session.items.keys().skip(before).copied().collect()
        }

        fn everyone_votes(&mut self, votes: [Vote; 3]) {
            for (actor, vote) in [self.pm, self.bob, self.carol].into_iter().zip(votes) {
                self.run(actor, Mutation::Vote(vote));
            }
        }

        fn vote_of(&self, participant_id: Uuid) -> Option<Vote> {
            self.session.participant(participant_id)?.current_vote
        }
    }

    fn apply(session: &Session, patch: SessionPatch) -> Session {
        let mut entity = SessionEntity::from(session);
        patch.apply_to(&mut entity).unwrap();
        Session::from(entity)
    }

    fn assert_current_item_is_valid(session: &Session) {
        if let Some(current) = session.current_item_id {
            assert!(
                session.items.contains_key(&current),
                "currentItemId {current} does not reference an item"
            );
        }
    }

    #[test]
    fn new_session_has_a_single_facilitator() {
        let session = new_session("  Alice ", 42).unwrap();
        assert_eq!(session.facilitator_name, "Alice");
        assert_eq!(session.participants.len(), 1);
        assert!(session.participants[0].is_pm);
        assert_eq!(session.participants[0].id, session.facilitator_id);
        assert_eq!(session.created_at, 42);

        assert!(matches!(
            new_session("   ", 0),
            Err(MutationError::InvalidInput(_))
        ));
    }

    #[test]
    fn join_appends_a_trimmed_regular_participant() {
        let session = new_session("Alice", 0).unwrap();
        let (participant, patch) = plan_join(&session, " Bob ").unwrap();
        assert_eq!(participant.name, "Bob");
        assert!(!participant.is_pm);
        assert_eq!(patch.touched_fields(), vec!["participants"]);

        let joined = apply(&session, patch);
        assert_eq!(joined.participants.last().map(|p| p.id), Some(participant.id));
        assert!(plan_join(&session, "\t").is_err());
    }

    #[test]
    fn adding_first_items_autoselects_and_enters_voting() {
        let mut room = Room::new();
        let ids = room.add(&["Login flow", "Signup"]);

        assert_eq!(room.session.current_item_id, Some(ids[0]));
        assert_eq!(
            SessionPhase::of(&room.session),
            SessionPhase::Voting { item_id: ids[0] }
        );
        assert!(
            room.session
                .items
                .values()
                .all(|item| item.status == ItemStatus::Pending)
        );

        // Later additions leave the selection alone.
        let patch = room
            .run(
                room.pm,
                Mutation::AddItems(vec![NewItem {
                    title: "Billing".into(),
                    link: Some("  https://tracker/1 ".into()),
                }]),
            )
            .unwrap();
        assert_eq!(patch.touched_fields(), vec!["items"]);
        assert_eq!(room.session.current_item_id, Some(ids[0]));
        let billing = room.session.items.values().last().unwrap();
        assert_eq!(billing.link.as_deref(), Some("https://tracker/1"));
    }

    #[test]
    fn blank_titles_are_rejected_before_writing() {
        let room = Room::new();
        let result = room.try_run(
            room.pm,
            Mutation::AddItems(vec![NewItem {
                title: "   ".into(),
                link: None,
            }]),
        );
        assert!(matches!(result, Err(MutationError::InvalidInput(_))));
        assert!(matches!(
            room.try_run(room.pm, Mutation::AddItems(Vec::new())),
            Err(MutationError::InvalidInput(_))
        ));
    }

    #[test]
    fn oversized_text_is_rejected_by_the_planner() {
        let room = Room::new();
        let long = "x".repeat(MAX_TEXT_LEN + 1);

        assert!(matches!(
            room.try_run(
                room.pm,
                Mutation::AddItems(vec![NewItem {
                    title: long.clone(),
                    link: None,
                }]),
            ),
            Err(MutationError::InvalidInput(_))
        ));
        assert!(plan_join(&room.session, &long).is_err());
        assert!(new_session(&long, 0).is_err());

        // Surrounding whitespace does not count towards the limit.
        let padded = format!("  {}  ", "x".repeat(MAX_TEXT_LEN));
        assert!(plan_join(&room.session, &padded).is_ok());
    }

    #[test]
    fn only_the_facilitator_manages_items_and_roster() {
        let mut room = Room::new();
        let ids = room.add(&["Login flow"]);

        for mutation in [
            Mutation::SelectItem(ids[0]),
            Mutation::DeleteItem(ids[0]),
            Mutation::RevealVotes,
            Mutation::NextItem,
            Mutation::Kick(room.carol),
            Mutation::SendNotification(room.carol),
        ] {
            assert_eq!(
                room.try_run(room.bob, mutation),
                Err(MutationError::NotFacilitator {
                    participant_id: room.bob
                })
            );
        }
    }

    #[test]
    fn unknown_actors_are_rejected() {
        let room = Room::new();
        let stranger = Uuid::new_v4();
        assert_eq!(
            room.try_run(stranger, Mutation::Vote(Vote::Points(5))),
            Err(MutationError::UnknownParticipant {
                participant_id: stranger
            })
        );
    }

    #[test]
    fn selecting_an_item_clears_votes_and_hides_them() {
        let mut room = Room::new();
        let ids = room.add(&["Login flow", "Signup"]);
        room.everyone_votes([Vote::Points(3), Vote::Points(5), Vote::Unknown]);
        room.run(room.pm, Mutation::RevealVotes);

        let patch = room.run(room.pm, Mutation::SelectItem(ids[1])).unwrap();
        assert_eq!(
            patch.touched_fields(),
            vec!["participants", "currentItemId", "votesRevealed"]
        );
        assert_eq!(room.session.current_item_id, Some(ids[1]));
        assert!(!room.session.votes_revealed);
        assert!(room.session.participants.iter().all(|p| p.current_vote.is_none()));
    }

    #[test]
    fn reselecting_the_current_item_is_a_no_op() {
        let mut room = Room::new();
        let ids = room.add(&["Login flow"]);
        assert_eq!(room.run(room.pm, Mutation::SelectItem(ids[0])), None);
        assert_eq!(
            room.try_run(room.pm, Mutation::SelectItem(Uuid::nil())),
            Err(MutationError::ItemNotFound {
                item_id: Uuid::nil()
            })
        );
    }

    #[test]
    fn votes_are_idempotent_and_require_an_open_round() {
        let mut room = Room::new();
        assert!(matches!(
            room.try_run(room.bob, Mutation::Vote(Vote::Points(5))),
            Err(MutationError::InvalidTransition(_))
        ));

        room.add(&["Login flow"]);
        assert!(room.run(room.bob, Mutation::Vote(Vote::Points(5))).is_some());
        assert_eq!(room.run(room.bob, Mutation::Vote(Vote::Points(5))), None);
        assert!(room.run(room.bob, Mutation::Vote(Vote::Unknown)).is_some());
        assert_eq!(room.vote_of(room.bob), Some(Vote::Unknown));

        assert!(matches!(
            room.try_run(room.bob, Mutation::Vote(Vote::Points(4))),
            Err(MutationError::InvalidInput(_))
        ));
    }

    #[test]
    fn reveal_requires_every_vote_including_the_facilitator() {
        let mut room = Room::new();
        room.add(&["Login flow"]);
        room.run(room.bob, Mutation::Vote(Vote::Points(5)));
        room.run(room.carol, Mutation::Vote(Vote::Points(8)));

        assert_eq!(
            room.try_run(room.pm, Mutation::RevealVotes),
            Err(MutationError::NotAllVoted { pending: 1 })
        );
        assert!(!room.session.votes_revealed);
    }

    #[test]
    fn reveal_records_numeric_votes_and_rounds_up() {
        let mut room = Room::new();
        let ids = room.add(&["Login flow"]);
        room.everyone_votes([Vote::Unknown, Vote::Points(5), Vote::Points(8)]);

        let patch = room.run(room.pm, Mutation::RevealVotes).unwrap();
        assert_eq!(patch.touched_fields(), vec!["items", "votesRevealed"]);

        let item = &room.session.items[&ids[0]];
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.average_points, Some(8));
        assert_eq!(
            item.votes,
            IndexMap::from([(room.bob, 5_u8), (room.carol, 8_u8)])
        );
        assert!(room.session.votes_revealed);

        // Voting is closed once revealed.
        assert!(matches!(
            room.try_run(room.bob, Mutation::Vote(Vote::Points(13))),
            Err(MutationError::InvalidTransition(_))
        ));
    }

    #[test]
    fn only_sentinel_votes_aggregate_to_the_minimum() {
        let mut room = Room::new();
        let ids = room.add(&["Spike"]);
        room.everyone_votes([Vote::Unknown; 3]);
        room.run(room.pm, Mutation::RevealVotes);

        let item = &room.session.items[&ids[0]];
        assert_eq!(item.average_points, Some(1));
        assert!(item.votes.is_empty());
    }

    #[test]
    fn next_item_advances_and_resets_the_round() {
        let mut room = Room::new();
        let ids = room.add(&["Login flow", "Signup"]);

        assert!(matches!(
            room.try_run(room.pm, Mutation::NextItem),
            Err(MutationError::InvalidTransition(_))
        ));

        room.everyone_votes([Vote::Points(2); 3]);
        room.run(room.pm, Mutation::RevealVotes);
        room.run(room.pm, Mutation::NextItem);

        assert_eq!(room.session.current_item_id, Some(ids[1]));
        assert!(!room.session.votes_revealed);
        assert!(room.session.participants.iter().all(|p| p.current_vote.is_none()));

        room.everyone_votes([Vote::Points(2); 3]);
        room.run(room.pm, Mutation::RevealVotes);
        assert_eq!(
            room.try_run(room.pm, Mutation::NextItem),
            Err(MutationError::NoNextItem)
        );
        assert_eq!(room.session.current_item_id, Some(ids[1]));
    }

    #[test]
    fn deleting_the_current_item_moves_to_a_neighbour() {
        let mut room = Room::new();
        let ids = room.add(&["A", "B", "C"]);
        room.run(room.pm, Mutation::SelectItem(ids[1]));
        room.run(room.bob, Mutation::Vote(Vote::Points(3)));

        room.run(room.pm, Mutation::DeleteItem(ids[1]));
        assert_eq!(room.session.current_item_id, Some(ids[2]));
        assert_eq!(room.vote_of(room.bob), None);

        room.run(room.pm, Mutation::DeleteItem(ids[2]));
        assert_eq!(room.session.current_item_id, Some(ids[0]));
    }

    #[test]
    fn deleting_the_last_item_clears_selection_votes_and_reveal() {
        let mut room = Room::new();
        let ids = room.add(&["Only"]);
        room.everyone_votes([Vote::Points(1); 3]);
        room.run(room.pm, Mutation::RevealVotes);

        room.run(room.pm, Mutation::DeleteItem(ids[0]));
        assert_eq!(room.session.current_item_id, None);
        assert!(!room.session.votes_revealed);
        assert!(room.session.participants.iter().all(|p| p.current_vote.is_none()));
        assert_eq!(SessionPhase::of(&room.session), SessionPhase::NoItemSelected);
    }

    #[test]
    fn deleting_another_item_only_touches_items() {
        let mut room = Room::new();
        let ids = room.add(&["A", "B"]);
        room.run(room.bob, Mutation::Vote(Vote::Points(3)));

        let patch = room.run(room.pm, Mutation::DeleteItem(ids[1])).unwrap();
        assert_eq!(patch.touched_fields(), vec!["items"]);
        assert_eq!(room.vote_of(room.bob), Some(Vote::Points(3)));
        assert_eq!(room.run(room.pm, Mutation::DeleteItem(ids[1])), None);
    }

    #[test]
    fn kick_removes_the_target_and_its_pending_notification() {
        let mut room = Room::new();
        room.add(&["A"]);
        room.run(room.pm, Mutation::SendNotification(room.carol));
        assert_eq!(room.session.notify_target_id, Some(room.carol));

        room.run(room.pm, Mutation::Kick(room.carol));
        assert!(!room.session.contains_participant(room.carol));
        assert_eq!(room.session.notify_target_id, None);

        assert_eq!(room.run(room.pm, Mutation::Kick(room.carol)), None);
        assert_eq!(
            room.try_run(room.pm, Mutation::Kick(room.pm)),
            Err(MutationError::CannotKickFacilitator)
        );
    }

    #[test]
    fn notifications_target_other_participants_without_a_vote() {
        let mut room = Room::new();
        room.add(&["A"]);
        room.run(room.bob, Mutation::Vote(Vote::Points(5)));

        for target in [room.pm, room.bob, Uuid::new_v4()] {
            assert!(matches!(
                room.try_run(room.pm, Mutation::SendNotification(target)),
                Err(MutationError::InvalidNotificationTarget { .. })
            ));
        }

        let patch = plan(
            &room.session,
            room.bob,
            &Mutation::SendNotification(room.carol),
            Privileges { secret_mode: true },
        )
        .unwrap()
        .unwrap();
        assert_eq!(patch.notify_target_id, Some(Some(room.carol)));
    }

    #[test]
    fn only_the_notified_participant_clears_the_notification() {
        let mut room = Room::new();
        room.run(room.pm, Mutation::SendNotification(room.carol));

        assert_eq!(room.run(room.bob, Mutation::ClearNotification), None);
        assert_eq!(room.session.notify_target_id, Some(room.carol));

        room.run(room.carol, Mutation::ClearNotification);
        assert_eq!(room.session.notify_target_id, None);
    }

    #[test]
    fn concurrent_plans_from_one_snapshot_keep_the_last_write() {
        let mut room = Room::new();
        let ids = room.add(&["A", "B", "C"]);
        let snapshot = room.session.clone();

        // Two facilitator tabs delete different items from the same snapshot.
        let first = plan(&snapshot, room.pm, &Mutation::DeleteItem(ids[1]), Privileges::default())
            .unwrap()
            .unwrap();
        let second = plan(&snapshot, room.pm, &Mutation::DeleteItem(ids[2]), Privileges::default())
            .unwrap()
            .unwrap();

        let merged = apply(&apply(&snapshot, first), second);
        let remaining = merged.items.keys().copied().collect::<Vec<_>>();
        assert_eq!(remaining, vec![ids[0], ids[1]]);
        assert_current_item_is_valid(&merged);
    }
}
