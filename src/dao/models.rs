use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use uuid::Uuid;

use crate::dao::storage::{StorageError, StorageResult};

/// Collection (or key prefix) under which every backend files session documents.
pub const SESSION_COLLECTION_NAME: &str = "sessions";

/// Shared session document exactly as it is stored and fanned out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntity {
    /// Stable identifier, also the document key.
    pub id: Uuid,
    /// Participant holding the facilitator privileges, fixed at creation.
    pub facilitator_id: Uuid,
    /// Display name captured when the session was created.
    pub facilitator_name: String,
    /// Work items in presentation order.
    #[serde(default)]
    pub items: Vec<WorkItemEntity>,
    /// Participants in join order.
    #[serde(default)]
    pub participants: Vec<ParticipantEntity>,
    /// Item currently open for voting.
    #[serde(default)]
    pub current_item_id: Option<Uuid>,
    /// Whether individual votes are visible to everyone.
    #[serde(default)]
    pub votes_revealed: bool,
    /// Participant targeted by a pending wizz.
    #[serde(default)]
    pub notify_target_id: Option<Uuid>,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: i64,
    /// Bumped by the store on every committed update.
    #[serde(default)]
    pub version: u64,
}

/// Work item ("story") embedded in a session document.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemEntity {
    /// Stable identifier within the session.
    pub id: Uuid,
    /// Short description shown to voters.
    pub title: String,
    /// Ticket URL in an external tracker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Lifecycle marker, never `voting` once persisted.
    pub status: ItemStatusEntity,
    /// Numeric votes recorded at reveal time, keyed by participant id.
    #[serde_as(as = "IndexMap<DisplayFromStr, _>")]
    #[serde(default)]
    pub votes: IndexMap<Uuid, i32>,
    /// Rounded average of the numeric votes, set at reveal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_points: Option<u32>,
}

/// Persisted lifecycle marker of a work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatusEntity {
    /// Not estimated yet.
    Pending,
    /// Open for voting.
    Voting,
    /// Votes were revealed and frozen.
    Completed,
}

/// Participant embedded in a session document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEntity {
    /// Stable identifier handed to the client on join.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Set only for the facilitator.
    #[serde(rename = "isPM", default)]
    pub is_pm: bool,
    /// `null` when no vote was cast, `-1` for the "?" vote.
    #[serde(default)]
    pub current_vote: Option<i32>,
}

/// Partial update naming only the top-level fields a mutation touches.
///
/// Absent fields are left untouched. For nullable fields the outer `Option`
/// says "touched" and the inner one carries the new value, so `Some(None)`
/// clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// Whole item list.
    pub items: Option<Vec<WorkItemEntity>>,
    /// Whole roster.
    pub participants: Option<Vec<ParticipantEntity>>,
    /// Current item pointer.
    pub current_item_id: Option<Option<Uuid>>,
    /// Reveal flag.
    pub votes_revealed: Option<bool>,
    /// Pending wizz target.
    pub notify_target_id: Option<Option<Uuid>>,
    /// When set, the write is rejected unless the stored version still matches.
    pub expected_version: Option<u64>,
}

impl SessionPatch {
    /// Names of the document fields this patch replaces, for logging.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.items.is_some() {
            fields.push("items");
        }
        if self.participants.is_some() {
            fields.push("participants");
        }
        if self.current_item_id.is_some() {
            fields.push("currentItemId");
        }
        if self.votes_revealed.is_some() {
            fields.push("votesRevealed");
        }
        if self.notify_target_id.is_some() {
            fields.push("notifyTargetId");
        }
        fields
    }

    /// Require the stored document to still be at `version` when the patch lands.
    pub fn expecting_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Replace the touched fields on `session` and bump its version.
    ///
    /// Stores call this inside whatever atomic section they have (a channel
    /// update, a revision-guarded PUT, a version-filtered replace) so the
    /// field replacement itself is never interleaved.
    pub fn apply_to(&self, session: &mut SessionEntity) -> StorageResult<()> {
        if let Some(expected) = self.expected_version
            && expected != session.version
        {
            return Err(StorageError::Conflict {
                id: session.id,
                expected,
                actual: session.version,
            });
        }

        if let Some(items) = &self.items {
            session.items = items.clone();
        }
        if let Some(participants) = &self.participants {
            session.participants = participants.clone();
        }
        if let Some(current_item_id) = self.current_item_id {
            session.current_item_id = current_item_id;
        }
        if let Some(votes_revealed) = self.votes_revealed {
            session.votes_revealed = votes_revealed;
        }
        if let Some(notify_target_id) = self.notify_target_id {
            session.notify_target_id = notify_target_id;
        }
        session.version += 1;

        Ok(())
    }
}

/// Filter used by the retention sweep to find candidate sessions.
///
/// Results always come back oldest first, which is the order sessions are reaped in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    /// Only sessions created strictly before this epoch-millis timestamp.
    pub created_before: Option<i64>,
    /// Keep at most this many of the oldest matches.
    pub limit: Option<usize>,
}

impl SessionQuery {
    /// Whether `session` passes the filters of this query.
    pub fn matches(&self, session: &SessionEntity) -> bool {
        self.created_before
            .is_none_or(|cutoff| session.created_at < cutoff)
    }

    /// Filter, sort and truncate documents for backends without native query support.
    pub fn apply(&self, sessions: impl IntoIterator<Item = SessionEntity>) -> Vec<SessionEntity> {
        let mut selected = sessions
            .into_iter()
            .filter(|session| self.matches(session))
            .collect::<Vec<_>>();

        selected.sort_by_key(|session| session.created_at);

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }

        selected
    }
}
