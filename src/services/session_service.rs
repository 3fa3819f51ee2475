use std::{sync::Arc, time::Instant};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{models::SessionEntity, session_store::SessionStore},
    dto::session::{
        ActionOutcome, ClientAction, CreateSessionResponse, JoinSessionResponse, SessionView,
        ViewerControls,
    },
    error::ServiceError,
    services::{
        client::{self, ClientEvent, ClientOptions, MutationOutcome, SessionClient},
        mutations::{Mutation, new_session, plan_join},
        retention,
    },
    state::{SharedControls, SharedState, session::Session},
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Sweep stale sessions, then open a new one with `facilitator_name` as its only participant.
pub async fn create_session(
    state: &SharedState,
    facilitator_name: &str,
) -> Result<CreateSessionResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let now = now_millis();

    let report = retention::sweep(store.as_ref(), state.config().retention(), now).await;
    for session_id in &report.removed {
        state.release_session(*session_id);
    }
    debug!(
        swept = report.removed.len(),
        tracked_participants = state.tracked_participants(),
        "retention sweep finished"
    );

    let session = new_session(facilitator_name, now)?;
    store.create_session(SessionEntity::from(&session)).await?;

    info!(session_id = %session.id, "session created");
    Ok(CreateSessionResponse {
        session_id: session.id,
        participant_id: session.facilitator_id,
    })
}

/// Append a participant named `name` to the roster.
pub async fn join_session(
    state: &SharedState,
    session_id: Uuid,
    name: &str,
) -> Result<JoinSessionResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(store.as_ref(), session_id).await?;

    let (participant, mut patch) = plan_join(&session, name)?;
    if state.config().strict_writes() {
        patch = patch.expecting_version(session.version);
    }
    store.update_session(session_id, patch).await?;

    info!(session_id = %session_id, participant_id = %participant.id, "participant joined");
    Ok(JoinSessionResponse {
        session_id,
        participant_id: participant.id,
    })
}

/// Latest snapshot projected for `viewer_id`.
pub async fn fetch_view(
    state: &SharedState,
    session_id: Uuid,
    viewer_id: Uuid,
) -> Result<SessionView, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(store.as_ref(), session_id).await?;
    ensure_on_roster(&session, viewer_id)?;

    let controls = viewer_controls(&state.controls_for(session_id, viewer_id)).await;
    Ok(SessionView::for_viewer(&session, viewer_id, &controls))
}

/// Run `action` for `participant_id`.
///
/// While the participant has a live client the mutation is planned against
/// its cached snapshot; otherwise against the latest stored one.
pub async fn execute_action(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
    action: ClientAction,
) -> Result<ActionOutcome, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(store.as_ref(), session_id).await?;
    ensure_on_roster(&session, participant_id)?;
    let controls = state.controls_for(session_id, participant_id);

    let mutation = match action {
        ClientAction::UnlockSecretMode => {
            controls.lock().await.unlock_secret_mode();
            info!(session_id = %session_id, participant_id = %participant_id, "secret mode unlocked");
            return Ok(ActionOutcome::Unlocked);
        }
        ClientAction::Mutate(mutation) => mutation,
    };

    let outcome = match state.live_client(session_id, participant_id) {
        Some(live) => live.execute(&mutation).await?,
        None => {
            client::commit_mutation(
                store.as_ref(),
                &session,
                participant_id,
                &mutation,
                &controls,
                state.config().strict_writes(),
            )
            .await?
        }
    };

    if outcome == MutationOutcome::Written
        && let Mutation::Kick(target_id) = mutation
    {
        state.release_participant(session_id, target_id);
        info!(session_id = %session_id, participant_id = %target_id, "participant kicked");
    }

    Ok(outcome.into())
}

/// Delete the whole session document. Only the facilitator may do this.
pub async fn delete_session(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(store.as_ref(), session_id).await?;
    if !session.is_facilitator(participant_id) {
        return Err(ServiceError::Unauthorized(
            "only the facilitator can delete the session".into(),
        ));
    }

    if !store.delete_session(session_id).await? {
        return Err(ServiceError::session_not_found(session_id));
    }
    state.release_session(session_id);

    info!(session_id = %session_id, "session deleted");
    Ok(())
}

/// Open a live client for `participant_id` once the session and roster entry are confirmed.
///
/// The host only keeps a weak reference: the client lives as long as the
/// caller holds the returned handle.
pub async fn subscribe(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<(Arc<SessionClient>, mpsc::Receiver<ClientEvent>), ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(store.as_ref(), session_id).await?;
    ensure_on_roster(&session, participant_id)?;

    let options = ClientOptions {
        strict_writes: state.config().strict_writes(),
        ..ClientOptions::default()
    };
    let controls = state.controls_for(session_id, participant_id);
    let (client, events) =
        SessionClient::connect(store, session_id, participant_id, controls, options);
    let client = Arc::new(client);
    state.register_client(&client);
    Ok((client, events))
}

/// Snapshot of the local controls that shape a viewer's projection.
pub async fn viewer_controls(controls: &SharedControls) -> ViewerControls {
    let mut guard = controls.lock().await;
    ViewerControls {
        secret_mode: guard.secret_mode(),
        wizz_disabled: guard.throttle_mut().disabled_targets(Instant::now()),
    }
}

async fn load_session(store: &dyn SessionStore, session_id: Uuid) -> Result<Session, ServiceError> {
    store
        .find_session(session_id)
        .await?
        .map(Session::from)
        .ok_or_else(|| ServiceError::session_not_found(session_id))
}

fn ensure_on_roster(session: &Session, participant_id: Uuid) -> Result<(), ServiceError> {
    if session.contains_participant(participant_id) {
        Ok(())
    } else {
        Err(ServiceError::RemovedFromSession { participant_id })
    }
}
