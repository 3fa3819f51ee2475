//! Request payloads and viewer projections of the session document.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::{format_epoch_millis, validation::validate_not_blank},
    services::{
        client::MutationOutcome,
        mutations::{Mutation, NewItem},
    },
    state::{
        session::{ItemStatus, Session, UNKNOWN_VOTE_SENTINEL, Vote, WorkItem},
        workflow::SessionPhase,
    },
};

/// Payload used to open a new session.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Display name of the facilitator.
    pub facilitator_name: String,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_not_blank(&self.facilitator_name) {
            errors.add("facilitatorName", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Identifiers handed back to the facilitator after creation.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// New session.
    pub session_id: Uuid,
    /// Facilitator's participant id.
    pub participant_id: Uuid,
}

/// Payload used to join an existing session.
#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinSessionRequest {
    /// Display name, trimmed before it is stored.
    pub name: String,
}

impl Validate for JoinSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_not_blank(&self.name) {
            errors.add("name", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Identifiers handed back to a participant after joining.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionResponse {
    /// Joined session.
    pub session_id: Uuid,
    /// Id to use for every later request.
    pub participant_id: Uuid,
}

/// Identity of the client a request is made for.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ParticipantQuery {
    /// Participant id returned on creation or join.
    pub participant_id: Uuid,
}

/// Item submitted by the facilitator.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewItemPayload {
    /// Short description shown to voters.
    pub title: String,
    /// Optional link to the ticket in an external tracker.
    #[serde(default)]
    pub link: Option<String>,
}

/// Vote as sent by a client: a scale value, or `"?"` / `-1` for "unknown".
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum VoteValue {
    /// Numeric value, including the stored `-1` sentinel.
    Points(i32),
    /// Textual form, only `"?"` is accepted.
    Symbol(String),
}

impl TryFrom<VoteValue> for Vote {
    type Error = String;

    fn try_from(value: VoteValue) -> Result<Self, Self::Error> {
        match value {
            VoteValue::Points(UNKNOWN_VOTE_SENTINEL) => Ok(Vote::Unknown),
            VoteValue::Points(points) => u8::try_from(points)
                .ok()
                .and_then(Vote::points)
                .ok_or_else(|| format!("{points} is not an estimation value")),
            VoteValue::Symbol(symbol) if symbol.trim() == "?" => Ok(Vote::Unknown),
            VoteValue::Symbol(symbol) => Err(format!("`{symbol}` is not a valid vote")),
        }
    }
}

/// Action requested by a participant.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionAction {
    /// Append items; the first one is selected when nothing is.
    AddItems {
        items: Vec<NewItemPayload>,
    },
    /// Open an item for voting.
    SelectItem {
        #[serde(rename = "itemId")]
        item_id: Uuid,
    },
    /// Remove an item.
    DeleteItem {
        #[serde(rename = "itemId")]
        item_id: Uuid,
    },
    /// Cast or change the caller's vote.
    Vote {
        value: VoteValue,
    },
    /// Show every vote once all participants voted.
    RevealVotes,
    /// Move to the item after the current one.
    NextItem,
    /// Remove a participant from the roster.
    KickParticipant {
        #[serde(rename = "targetId")]
        target_id: Uuid,
    },
    /// Nudge a participant.
    SendNotification {
        #[serde(rename = "targetId")]
        target_id: Uuid,
    },
    /// Clear a nudge addressed to the caller.
    ClearNotification,
    /// Unlock the hidden mode letting this client send notifications.
    UnlockSecretMode,
}

/// Action envelope posted to `/sessions/{id}/actions`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// Participant the action is performed for.
    pub participant_id: Uuid,
    /// Requested action.
    pub action: SessionAction,
}

impl Validate for ActionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match &self.action {
            SessionAction::AddItems { items } if items.is_empty() => {
                let mut err = ValidationError::new("empty");
                err.message = Some("At least one item is required".into());
                errors.add("items", err);
            }
            SessionAction::AddItems { items } => {
                for item in items {
                    if let Err(e) = validate_not_blank(&item.title) {
                        errors.add("title", e);
                    }
                }
            }
            SessionAction::Vote { value } => {
                if let Err(message) = Vote::try_from(value.clone()) {
                    let mut err = ValidationError::new("vote");
                    err.message = Some(message.into());
                    errors.add("value", err);
                }
            }
            _ => {}
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Decoded action: either a document mutation or a client-local toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Change to the shared document.
    Mutate(Mutation),
    /// Local unlock, nothing is written.
    UnlockSecretMode,
}

impl TryFrom<SessionAction> for ClientAction {
    type Error = String;

    fn try_from(value: SessionAction) -> Result<Self, Self::Error> {
        let mutation = match value {
            SessionAction::AddItems { items } => Mutation::AddItems(
                items
                    .into_iter()
                    .map(|item| NewItem {
                        title: item.title,
                        link: item.link,
                    })
                    .collect(),
            ),
            SessionAction::SelectItem { item_id } => Mutation::SelectItem(item_id),
            SessionAction::DeleteItem { item_id } => Mutation::DeleteItem(item_id),
            SessionAction::Vote { value } => Mutation::Vote(value.try_into()?),
            SessionAction::RevealVotes => Mutation::RevealVotes,
            SessionAction::NextItem => Mutation::NextItem,
            SessionAction::KickParticipant { target_id } => Mutation::Kick(target_id),
            SessionAction::SendNotification { target_id } => Mutation::SendNotification(target_id),
            SessionAction::ClearNotification => Mutation::ClearNotification,
            SessionAction::UnlockSecretMode => return Ok(ClientAction::UnlockSecretMode),
        };
        Ok(ClientAction::Mutate(mutation))
    }
}

/// Result of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ActionOutcome {
    /// A partial update was committed.
    Written,
    /// Nothing to change.
    Unchanged,
    /// Blocked by the notification throttle; nothing was written.
    Throttled,
    /// Secret mode is on for this client. Local only, nothing was written.
    Unlocked,
}

impl From<MutationOutcome> for ActionOutcome {
    fn from(value: MutationOutcome) -> Self {
        match value {
            MutationOutcome::Written => ActionOutcome::Written,
            MutationOutcome::Unchanged => ActionOutcome::Unchanged,
            MutationOutcome::Throttled => ActionOutcome::Throttled,
        }
    }
}

/// Result of `POST /sessions/{id}/actions`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// What the action did.
    pub outcome: ActionOutcome,
}

/// Workflow phase as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum PhaseView {
    /// No current item.
    NoItemSelected,
    /// Current item open, votes hidden.
    Voting,
    /// Current item revealed.
    Revealed,
}

impl From<SessionPhase> for PhaseView {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::NoItemSelected => PhaseView::NoItemSelected,
            SessionPhase::Voting { .. } => PhaseView::Voting,
            SessionPhase::Revealed { .. } => PhaseView::Revealed,
        }
    }
}

/// Item status as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatusView {
    /// Not estimated yet.
    Pending,
    /// Current item while votes are hidden.
    Voting,
    /// Estimated.
    Completed,
}

impl From<ItemStatus> for ItemStatusView {
    fn from(value: ItemStatus) -> Self {
        match value {
            ItemStatus::Pending => ItemStatusView::Pending,
            ItemStatus::Voting => ItemStatusView::Voting,
            ItemStatus::Completed => ItemStatusView::Completed,
        }
    }
}

/// Vote frozen on an item at reveal time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordedVoteView {
    /// Voter.
    pub participant_id: Uuid,
    /// Numeric value; "?" votes are not recorded.
    pub points: u8,
}

/// Work item as seen by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemView {
    /// Item id.
    pub id: Uuid,
    /// Short description.
    pub title: String,
    /// Ticket URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// `voting` is derived for the current item while votes are hidden.
    pub status: ItemStatusView,
    /// Whether this is the item under vote.
    pub is_current: bool,
    /// Votes frozen at reveal, in roster order.
    pub votes: Vec<RecordedVoteView>,
    /// Rounded average, once revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_points: Option<u8>,
}

/// Roster entry as seen by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Participant id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Facilitator flag.
    #[serde(rename = "isPM")]
    pub is_pm: bool,
    /// Whether a vote was cast on the current item.
    pub has_voted: bool,
    /// Vote value (`"?"` for the unknown vote) when visible to the viewer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
}

/// Client-local state of the viewer folded into its projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerControls {
    /// Secret mode unlocked for this viewer.
    pub secret_mode: bool,
    /// Targets the viewer's throttle currently blocks.
    pub wizz_disabled: Vec<Uuid>,
}

/// One snapshot as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session id.
    pub id: Uuid,
    /// Participant the projection was made for.
    pub viewer_id: Uuid,
    /// Facilitator's participant id.
    pub facilitator_id: Uuid,
    /// Facilitator's display name.
    pub facilitator_name: String,
    /// Whether the viewer is the facilitator.
    pub is_facilitator: bool,
    /// Derived workflow phase.
    pub phase: PhaseView,
    /// Item under vote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<Uuid>,
    /// Whether votes are visible to everyone.
    pub votes_revealed: bool,
    /// Everyone voted, so the facilitator may reveal.
    pub can_reveal: bool,
    /// An item follows the current one.
    pub has_next_item: bool,
    /// Whether the viewer may send notifications.
    pub can_notify: bool,
    /// Targets the viewer cannot nudge right now.
    pub wizz_disabled_targets: Vec<Uuid>,
    /// Items in presentation order.
    pub items: Vec<WorkItemView>,
    /// Roster in join order.
    pub participants: Vec<ParticipantView>,
    /// Document version the projection was made from.
    pub version: u64,
    /// Creation time, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl SessionView {
    /// Project `session` for `viewer_id`, hiding other participants' votes
    /// until they are revealed unless the viewer is the facilitator.
    pub fn for_viewer(session: &Session, viewer_id: Uuid, controls: &ViewerControls) -> Self {
        let phase = SessionPhase::of(session);
        let is_facilitator = session.is_facilitator(viewer_id);
        let sees_all_votes = is_facilitator || session.votes_revealed;

        let items = session
            .items
            .values()
            .map(|item| item_view(item, phase))
            .collect();

        let participants = session
            .participants
            .iter()
            .map(|participant| {
                let visible = sees_all_votes || participant.id == viewer_id;
                ParticipantView {
                    id: participant.id,
                    name: participant.name.clone(),
                    is_pm: participant.is_pm,
                    has_voted: participant.has_voted(),
                    vote: participant
                        .current_vote
                        .filter(|_| visible)
                        .map(|vote| vote.to_string()),
                }
            })
            .collect();

        Self {
            id: session.id,
            viewer_id,
            facilitator_id: session.facilitator_id,
            facilitator_name: session.facilitator_name.clone(),
            is_facilitator,
            phase: phase.into(),
            current_item_id: session.current_item_id,
            votes_revealed: session.votes_revealed,
            can_reveal: matches!(phase, SessionPhase::Voting { .. }) && session.all_voted(),
            has_next_item: session.next_item_id().is_some(),
            can_notify: is_facilitator || controls.secret_mode,
            wizz_disabled_targets: controls.wizz_disabled.clone(),
            items,
            participants,
            version: session.version,
            created_at: format_epoch_millis(session.created_at),
        }
    }
}

fn item_view(item: &WorkItem, phase: SessionPhase) -> WorkItemView {
    let is_current = phase.item_id() == Some(item.id);
    let status = match phase {
        SessionPhase::Voting { item_id } if item_id == item.id => ItemStatus::Voting,
        _ => item.status,
    };

    WorkItemView {
        id: item.id,
        title: item.title.clone(),
        link: item.link.clone(),
        status: status.into(),
        is_current,
        votes: item
            .votes
            .iter()
            .map(|(participant_id, points)| RecordedVoteView {
                participant_id: *participant_id,
                points: *points,
            })
            .collect(),
        average_points: item.average_points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::SessionEntity,
        services::mutations::{Privileges, new_session, plan, plan_join},
    };

    fn voting_session() -> (Session, Uuid, Uuid) {
        let mut session = new_session("Alice", 1_700_000_000_000).unwrap();
        let pm = session.facilitator_id;
        let (bob, patch) = plan_join(&session, "Bob").unwrap();
        session = apply(&session, patch);

        for (actor, mutation) in [
            (
                pm,
                Mutation::AddItems(vec![NewItem {
                    title: "Login flow".into(),
                    link: None,
                }]),
            ),
            (pm, Mutation::Vote(Vote::Unknown)),
            (bob.id, Mutation::Vote(Vote::Points(8))),
        ] {
            let patch = plan(&session, actor, &mutation, Privileges::default())
                .unwrap()
                .unwrap();
            session = apply(&session, patch);
        }
        (session, pm, bob.id)
    }

    fn apply(session: &Session, patch: crate::dao::models::SessionPatch) -> Session {
        let mut entity = SessionEntity::from(session);
        patch.apply_to(&mut entity).unwrap();
        Session::from(entity)
    }

    #[test]
    fn votes_stay_hidden_from_participants_until_reveal() {
        let (session, pm, bob) = voting_session();
        let view = SessionView::for_viewer(&session, bob, &ViewerControls::default());

        let pm_view = view.participants.iter().find(|p| p.id == pm).unwrap();
        assert!(pm_view.has_voted);
        assert_eq!(pm_view.vote, None);

        let own = view.participants.iter().find(|p| p.id == bob).unwrap();
        assert_eq!(own.vote.as_deref(), Some("8"));
        assert!(!view.can_notify);
    }

    #[test]
    fn facilitator_sees_votes_and_sentinel_renders_as_question_mark() {
        let (session, pm, _) = voting_session();
        let view = SessionView::for_viewer(&session, pm, &ViewerControls::default());

        let own = view.participants.iter().find(|p| p.id == pm).unwrap();
        assert_eq!(own.vote.as_deref(), Some("?"));
        assert!(view.can_reveal);
        assert!(view.can_notify);
        assert_eq!(view.phase, PhaseView::Voting);
        assert_eq!(view.items[0].status, ItemStatusView::Voting);
        assert!(view.items[0].is_current);
    }

    #[test]
    fn projection_serializes_with_client_field_names() {
        let (session, _, bob) = voting_session();
        let view = SessionView::for_viewer(&session, bob, &ViewerControls::default());
        let value = serde_json::to_value(&view).unwrap();

        assert_eq!(value["phase"], "voting");
        assert_eq!(value["items"][0]["status"], "voting");
        assert_eq!(value["participants"][0]["isPM"], true);
        assert_eq!(value["createdAt"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn actions_decode_from_tagged_json() {
        let request: ActionRequest = serde_json::from_value(serde_json::json!({
            "participantId": Uuid::nil(),
            "action": { "type": "vote", "value": "?" }
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(
            ClientAction::try_from(request.action).unwrap(),
            ClientAction::Mutate(Mutation::Vote(Vote::Unknown))
        );

        // The stored sentinel is accepted on the wire as well.
        let request: ActionRequest = serde_json::from_value(serde_json::json!({
            "participantId": Uuid::nil(),
            "action": { "type": "vote", "value": -1 }
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(
            ClientAction::try_from(request.action).unwrap(),
            ClientAction::Mutate(Mutation::Vote(Vote::Unknown))
        );

        let request: ActionRequest = serde_json::from_value(serde_json::json!({
            "participantId": Uuid::nil(),
            "action": { "type": "selectItem", "itemId": Uuid::nil() }
        }))
        .unwrap();
        assert_eq!(
            ClientAction::try_from(request.action).unwrap(),
            ClientAction::Mutate(Mutation::SelectItem(Uuid::nil()))
        );
    }

    #[test]
    fn invalid_votes_and_blank_titles_fail_validation() {
        let vote: ActionRequest = serde_json::from_value(serde_json::json!({
            "participantId": Uuid::nil(),
            "action": { "type": "vote", "value": 4 }
        }))
        .unwrap();
        assert!(vote.validate().is_err());

        let negative: ActionRequest = serde_json::from_value(serde_json::json!({
            "participantId": Uuid::nil(),
            "action": { "type": "vote", "value": -3 }
        }))
        .unwrap();
        assert!(negative.validate().is_err());

        let items: ActionRequest = serde_json::from_value(serde_json::json!({
            "participantId": Uuid::nil(),
            "action": { "type": "addItems", "items": [{ "title": "  " }] }
        }))
        .unwrap();
        assert!(items.validate().is_err());
    }
}
