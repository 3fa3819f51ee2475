use std::fmt;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::models::{ItemStatusEntity, ParticipantEntity, SessionEntity, WorkItemEntity};

/// Ordered values a participant may vote with. "?" is stored separately as [`Vote::Unknown`].
pub const ESTIMATION_SCALE: [u8; 7] = [1, 2, 3, 5, 8, 13, 21];

/// Raw value stored in `currentVote` for the "?" vote.
pub const UNKNOWN_VOTE_SENTINEL: i32 = -1;

/// Longest display name or item title accepted, in characters.
pub const MAX_TEXT_LEN: usize = 200;

/// A cast vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vote {
    /// Numeric estimate taken from [`ESTIMATION_SCALE`].
    Points(u8),
    /// Non-numeric "I don't know" estimate.
    Unknown,
}

impl Vote {
    /// Build a numeric vote, rejecting values outside the estimation scale.
    pub fn points(value: u8) -> Option<Self> {
        ESTIMATION_SCALE
            .contains(&value)
            .then_some(Vote::Points(value))
    }

    /// Decode the stored representation. Any negative value reads as the sentinel.
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 {
            return Some(Vote::Unknown);
        }
        u8::try_from(raw).ok().map(Vote::Points)
    }

    /// Encode for storage.
    pub fn as_raw(self) -> i32 {
        match self {
            Vote::Points(value) => i32::from(value),
            Vote::Unknown => UNKNOWN_VOTE_SENTINEL,
        }
    }

    /// Numeric value, `None` for the sentinel.
    pub fn numeric(self) -> Option<u8> {
        match self {
            Vote::Points(value) => Some(value),
            Vote::Unknown => None,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Points(value) => write!(f, "{value}"),
            Vote::Unknown => f.write_str("?"),
        }
    }
}

/// Lifecycle marker of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Not estimated yet.
    Pending,
    /// Only ever derived for display; never written to the document.
    Voting,
    /// Votes were revealed and frozen.
    Completed,
}

/// Unit of work being estimated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Item id.
    pub id: Uuid,
    /// Short description.
    pub title: String,
    /// Ticket URL.
    pub link: Option<String>,
    /// Lifecycle marker.
    pub status: ItemStatus,
    /// Numeric votes frozen at reveal time, keyed by participant id.
    pub votes: IndexMap<Uuid, u8>,
    /// Rounded average of the numeric votes.
    pub average_points: Option<u8>,
}

impl WorkItem {
    /// Fresh pending item with a random id.
    pub fn new(title: String, link: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            link,
            status: ItemStatus::Pending,
            votes: IndexMap::new(),
            average_points: None,
        }
    }
}

/// Member of a session roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Participant id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Facilitator flag, fixed when the participant is created.
    pub is_pm: bool,
    /// Vote on the current item, if cast.
    pub current_vote: Option<Vote>,
}

impl Participant {
    /// New participant with a random id and no vote.
    pub fn new(name: String, is_pm: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            is_pm,
            current_vote: None,
        }
    }

    /// Whether a vote was cast on the current item.
    pub fn has_voted(&self) -> bool {
        self.current_vote.is_some()
    }
}

/// Decoded view of one session snapshot.
///
/// Items are keyed by id while keeping their presentation order, so the
/// `currentItemId` pointer resolves without scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id.
    pub id: Uuid,
    /// Participant holding facilitator rights.
    pub facilitator_id: Uuid,
    /// Facilitator's display name.
    pub facilitator_name: String,
    /// Items in presentation order.
    pub items: IndexMap<Uuid, WorkItem>,
    /// Roster in join order.
    pub participants: Vec<Participant>,
    /// Item under vote.
    pub current_item_id: Option<Uuid>,
    /// Whether votes are visible to everyone.
    pub votes_revealed: bool,
    /// Pending wizz target.
    pub notify_target_id: Option<Uuid>,
    /// Creation time in epoch milliseconds.
    pub created_at: i64,
    /// Store version of this snapshot.
    pub version: u64,
}

impl Session {
    /// Whether `participant_id` holds facilitator rights.
    pub fn is_facilitator(&self, participant_id: Uuid) -> bool {
        self.facilitator_id == participant_id
    }

    /// Roster entry of `participant_id`.
    pub fn participant(&self, participant_id: Uuid) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| participant.id == participant_id)
    }

    /// Whether `participant_id` is on the roster.
    pub fn contains_participant(&self, participant_id: Uuid) -> bool {
        self.participant(participant_id).is_some()
    }

    /// Item `currentItemId` points at, if it resolves.
    pub fn current_item(&self) -> Option<&WorkItem> {
        self.current_item_id.and_then(|id| self.items.get(&id))
    }

    /// Every participant holds a vote; the sentinel counts as voted.
    pub fn all_voted(&self) -> bool {
        self.participants.iter().all(Participant::has_voted)
    }

    /// Participants still missing a vote.
    pub fn pending_voters(&self) -> usize {
        self.participants
            .iter()
            .filter(|participant| !participant.has_voted())
            .count()
    }

    /// Item following the current one in presentation order.
    pub fn next_item_id(&self) -> Option<Uuid> {
        let index = self.items.get_index_of(&self.current_item_id?)?;
        self.items.get_index(index + 1).map(|(id, _)| *id)
    }

    /// Roster copy with every vote cleared, as written whenever the current item changes.
    pub fn participants_without_votes(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .cloned()
            .map(|mut participant| {
                participant.current_vote = None;
                participant
            })
            .collect()
    }
}

impl From<ItemStatusEntity> for ItemStatus {
    fn from(value: ItemStatusEntity) -> Self {
        match value {
            ItemStatusEntity::Pending => ItemStatus::Pending,
            ItemStatusEntity::Voting => ItemStatus::Voting,
            ItemStatusEntity::Completed => ItemStatus::Completed,
        }
    }
}

impl From<ItemStatus> for ItemStatusEntity {
    fn from(value: ItemStatus) -> Self {
        match value {
            ItemStatus::Pending => ItemStatusEntity::Pending,
            ItemStatus::Voting => ItemStatusEntity::Voting,
            ItemStatus::Completed => ItemStatusEntity::Completed,
        }
    }
}

impl From<WorkItemEntity> for WorkItem {
    fn from(value: WorkItemEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            link: value.link,
            status: value.status.into(),
            votes: value
                .votes
                .into_iter()
                .filter_map(|(participant_id, raw)| {
                    u8::try_from(raw).ok().map(|points| (participant_id, points))
                })
                .collect(),
            average_points: value
                .average_points
                .and_then(|points| u8::try_from(points).ok()),
        }
    }
}

impl From<&WorkItem> for WorkItemEntity {
    fn from(value: &WorkItem) -> Self {
        Self {
            id: value.id,
            title: value.title.clone(),
            link: value.link.clone(),
            status: value.status.into(),
            votes: value
                .votes
                .iter()
                .map(|(participant_id, points)| (*participant_id, i32::from(*points)))
                .collect(),
            average_points: value.average_points.map(u32::from),
        }
    }
}

impl From<ParticipantEntity> for Participant {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            is_pm: value.is_pm,
            current_vote: value.current_vote.and_then(Vote::from_raw),
        }
    }
}

impl From<&Participant> for ParticipantEntity {
    fn from(value: &Participant) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            is_pm: value.is_pm,
            current_vote: value.current_vote.map(Vote::as_raw),
        }
    }
}

impl From<SessionEntity> for Session {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            facilitator_id: value.facilitator_id,
            facilitator_name: value.facilitator_name,
            items: value
                .items
                .into_iter()
                .map(|item| (item.id, WorkItem::from(item)))
                .collect(),
            participants: value.participants.into_iter().map(Into::into).collect(),
            current_item_id: value.current_item_id,
            votes_revealed: value.votes_revealed,
            notify_target_id: value.notify_target_id,
            created_at: value.created_at,
            version: value.version,
        }
    }
}

impl From<&Session> for SessionEntity {
    fn from(value: &Session) -> Self {
        Self {
            id: value.id,
            facilitator_id: value.facilitator_id,
            facilitator_name: value.facilitator_name.clone(),
            items: items_to_entities(&value.items),
            participants: participants_to_entities(&value.participants),
            current_item_id: value.current_item_id,
            votes_revealed: value.votes_revealed,
            notify_target_id: value.notify_target_id,
            created_at: value.created_at,
            version: value.version,
        }
    }
}

/// Encode an item sequence for an `items` patch.
pub fn items_to_entities(items: &IndexMap<Uuid, WorkItem>) -> Vec<WorkItemEntity> {
    items.values().map(WorkItemEntity::from).collect()
}

/// Encode a roster for a `participants` patch.
pub fn participants_to_entities(participants: &[Participant]) -> Vec<ParticipantEntity> {
    participants.iter().map(ParticipantEntity::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_items(count: usize) -> Session {
        let facilitator = Participant::new("Alice".into(), true);
        let items = (0..count)
            .map(|index| WorkItem::new(format!("Item {index}"), None))
            .map(|item| (item.id, item))
            .collect();
        Session {
            id: Uuid::new_v4(),
            facilitator_id: facilitator.id,
            facilitator_name: facilitator.name.clone(),
            items,
            participants: vec![facilitator],
            current_item_id: None,
            votes_revealed: false,
            notify_target_id: None,
            created_at: 0,
            version: 0,
        }
    }

    #[test]
    fn sentinel_vote_round_trips_and_renders_as_question_mark() {
        assert_eq!(Vote::from_raw(-1), Some(Vote::Unknown));
        assert_eq!(Vote::Unknown.as_raw(), UNKNOWN_VOTE_SENTINEL);
        assert_eq!(Vote::Unknown.to_string(), "?");
        assert_eq!(Vote::Points(13).to_string(), "13");
    }

    #[test]
    fn numeric_votes_must_come_from_the_scale() {
        assert_eq!(Vote::points(8), Some(Vote::Points(8)));
        assert_eq!(Vote::points(4), None);
        assert_eq!(Vote::points(0), None);
    }

    #[test]
    fn next_item_follows_presentation_order() {
        let mut session = session_with_items(3);
        let ids = session.items.keys().copied().collect::<Vec<_>>();

        assert_eq!(session.next_item_id(), None);
        session.current_item_id = Some(ids[0]);
        assert_eq!(session.next_item_id(), Some(ids[1]));
        session.current_item_id = Some(ids[2]);
        assert_eq!(session.next_item_id(), None);
    }

    #[test]
    fn sentinel_counts_as_voted() {
        let mut session = session_with_items(1);
        session.participants.push(Participant::new("Bob".into(), false));
        assert!(!session.all_voted());
        assert_eq!(session.pending_voters(), 2);

        session.participants[0].current_vote = Some(Vote::Unknown);
        session.participants[1].current_vote = Some(Vote::Points(5));
        assert!(session.all_voted());
    }

    #[test]
    fn entity_conversion_keeps_order_and_votes() {
        let mut session = session_with_items(2);
        let first = *session.items.keys().next().unwrap();
        session.current_item_id = Some(first);
        session.participants[0].current_vote = Some(Vote::Unknown);

        let entity = SessionEntity::from(&session);
        assert_eq!(entity.participants[0].current_vote, Some(-1));
        assert_eq!(entity.items[0].id, first);

        assert_eq!(Session::from(entity), session);
    }
}
