//! Per-participant view of one session.
//!
//! A [`SessionClient`] owns a store subscription, caches the latest snapshot
//! and plans every action against it. The subscription is consumed by a
//! forwarder task which also acknowledges nudges addressed to the client.
//! Dropping the client tears the task down.

use std::{sync::Arc, time::Instant};

use futures::StreamExt;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        session_store::{SessionStore, SnapshotEvent},
        storage::StorageError,
    },
    error::ServiceError,
    services::mutations::{Mutation, Privileges, plan},
    state::{SharedControls, session::Session, wizz::ThrottleDecision},
};

/// Item delivered to the owner of a [`SessionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Latest authoritative document.
    Snapshot(Session),
    /// Someone nudged this participant. Emitted once per nudge.
    Notified,
    /// The participant is no longer on the roster. Last event.
    Removed,
    /// The session document is gone. Last event.
    NotFound,
    /// The subscription broke. Last event.
    Failed(String),
}

/// What an action ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The patch was committed.
    Written,
    /// Already satisfied; no write was issued.
    Unchanged,
    /// Suppressed by the local wizz throttle; no write was issued.
    Throttled,
}

/// Tuning of a [`SessionClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Guard every write with the version of the snapshot it was planned from.
    pub strict_writes: bool,
    /// Capacity of the event channel handed to the owner.
    pub buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            strict_writes: false,
            buffer: 16,
        }
    }
}

#[derive(Debug, Clone)]
enum CacheState {
    Connecting,
    Ready(Session),
    Closed(CloseReason),
}

#[derive(Debug, Clone)]
enum CloseReason {
    Removed,
    NotFound,
    Failed(String),
    /// The owner dropped its receiver.
    Detached,
}

/// Live handle on a session for one participant.
pub struct SessionClient {
    store: Arc<dyn SessionStore>,
    session_id: Uuid,
    participant_id: Uuid,
    controls: SharedControls,
    options: ClientOptions,
    cache: watch::Receiver<CacheState>,
    task: JoinHandle<()>,
}

impl SessionClient {
    /// Subscribe to `session_id` on behalf of `participant_id`.
    ///
    /// The first event on the returned receiver is the current snapshot, or
    /// the terminal event explaining why there is none.
    pub fn connect(
        store: Arc<dyn SessionStore>,
        session_id: Uuid,
        participant_id: Uuid,
        controls: SharedControls,
        options: ClientOptions,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(options.buffer.max(1));
        let (cache_tx, cache_rx) = watch::channel(CacheState::Connecting);

        let forwarder = Forwarder {
            store: store.clone(),
            session_id,
            participant_id,
            events: events_tx,
            cache: cache_tx,
        };
        let task = tokio::spawn(forwarder.run());

        let client = Self {
            store,
            session_id,
            participant_id,
            controls,
            options,
            cache: cache_rx,
            task,
        };
        (client, events_rx)
    }

    /// Session this client follows.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Participant this client acts for.
    pub fn participant_id(&self) -> Uuid {
        self.participant_id
    }

    /// Local controls shared with the participant's action requests.
    pub fn controls(&self) -> &SharedControls {
        &self.controls
    }

    /// Latest cached snapshot, waiting for the first one if needed.
    pub async fn snapshot(&self) -> Result<Session, ServiceError> {
        let mut cache = self.cache.clone();
        let state = cache
            .wait_for(|state| !matches!(state, CacheState::Connecting))
            .await
            .map(|state| state.clone())
            .map_err(|_| ServiceError::Degraded)?;

        match state {
            CacheState::Ready(session) => Ok(session),
            CacheState::Closed(CloseReason::Removed) => Err(ServiceError::RemovedFromSession {
                participant_id: self.participant_id,
            }),
            CacheState::Closed(CloseReason::NotFound) => {
                Err(ServiceError::session_not_found(self.session_id))
            }
            CacheState::Closed(_) | CacheState::Connecting => Err(ServiceError::Degraded),
        }
    }

    /// Plan `mutation` against the cached snapshot and write the resulting patch.
    pub async fn execute(&self, mutation: &Mutation) -> Result<MutationOutcome, ServiceError> {
        let session = self.snapshot().await?;
        commit_mutation(
            self.store.as_ref(),
            &session,
            self.participant_id,
            mutation,
            &self.controls,
            self.options.strict_writes,
        )
        .await
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Plan `mutation` for `actor` against `session` and issue the partial write.
///
/// Nudges go through the actor's local throttle first; a throttled click
/// writes nothing. A failed write is logged and surfaced, never retried.
pub async fn commit_mutation(
    store: &dyn SessionStore,
    session: &Session,
    actor: Uuid,
    mutation: &Mutation,
    controls: &SharedControls,
    strict_writes: bool,
) -> Result<MutationOutcome, ServiceError> {
    let privileges = Privileges {
        secret_mode: controls.lock().await.secret_mode(),
    };

    let Some(mut patch) = plan(session, actor, mutation, privileges)? else {
        debug!(
            session_id = %session.id,
            participant_id = %actor,
            mutation = mutation.name(),
            "mutation already satisfied"
        );
        return Ok(MutationOutcome::Unchanged);
    };

    if let Mutation::SendNotification(target_id) = mutation {
        let decision = controls
            .lock()
            .await
            .throttle_mut()
            .register_click(*target_id, Instant::now());
        if decision == ThrottleDecision::Throttled {
            debug!(session_id = %session.id, target_id = %target_id, "wizz throttled");
            return Ok(MutationOutcome::Throttled);
        }
    }

    if strict_writes {
        patch = patch.expecting_version(session.version);
    }

    let fields = patch.touched_fields();
    if let Err(err) = store.update_session(session.id, patch).await {
        warn!(
            session_id = %session.id,
            participant_id = %actor,
            mutation = mutation.name(),
            error = %err,
            "write failed"
        );
        return Err(err.into());
    }

    debug!(
        session_id = %session.id,
        participant_id = %actor,
        mutation = mutation.name(),
        ?fields,
        "mutation committed"
    );
    Ok(MutationOutcome::Written)
}

/// Where the forwarder stands with the nudge addressed to its participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NudgeState {
    /// No nudge seen since the last snapshot without one.
    Idle,
    /// Surfaced to the owner, not cleared yet.
    Pending,
    /// Our clear committed at this version.
    Cleared(u64),
}

impl NudgeState {
    /// Whether a snapshot at `version` targeting us carries a nudge not surfaced yet.
    ///
    /// Once our clear committed, any later version still targeting us was
    /// written by a new nudge, even if the cleared snapshot was never delivered.
    fn is_fresh(self, version: u64) -> bool {
        match self {
            NudgeState::Idle => true,
            NudgeState::Pending => false,
            NudgeState::Cleared(cleared_at) => version > cleared_at,
        }
    }
}

struct Forwarder {
    store: Arc<dyn SessionStore>,
    session_id: Uuid,
    participant_id: Uuid,
    events: mpsc::Sender<ClientEvent>,
    cache: watch::Sender<CacheState>,
}

impl Forwarder {
    async fn run(self) {
        let mut snapshots = self.store.subscribe(self.session_id);
        let mut nudge = NudgeState::Idle;

        let reason = loop {
            let next = tokio::select! {
                _ = self.events.closed() => break CloseReason::Detached,
                next = snapshots.next() => next,
            };

            let entity = match next {
                Some(Ok(SnapshotEvent::Snapshot(entity))) => entity,
                Some(Ok(SnapshotEvent::NotFound)) | None => break CloseReason::NotFound,
                Some(Err(err)) => {
                    warn!(session_id = %self.session_id, error = %err, "session subscription failed");
                    break CloseReason::Failed(err.to_string());
                }
            };

            let session = Session::from(entity);
            if !session.contains_participant(self.participant_id) {
                break CloseReason::Removed;
            }

            let notified = session.notify_target_id == Some(self.participant_id);
            self.cache.send_replace(CacheState::Ready(session.clone()));
            if self
                .events
                .send(ClientEvent::Snapshot(session.clone()))
                .await
                .is_err()
            {
                break CloseReason::Detached;
            }

            if !notified {
                nudge = NudgeState::Idle;
                continue;
            }
            if nudge.is_fresh(session.version) {
                if self.events.send(ClientEvent::Notified).await.is_err() {
                    break CloseReason::Detached;
                }
                nudge = NudgeState::Pending;
            }
            if nudge == NudgeState::Pending
                && let Some(cleared_at) = self.acknowledge(&session).await
            {
                nudge = NudgeState::Cleared(cleared_at);
            }
        };

        self.close(reason).await;
    }

    /// Clear the nudge addressed to this participant, guarded by the version
    /// of `session`. Returns the version the clearing write produced.
    async fn acknowledge(&self, session: &Session) -> Option<u64> {
        let planned = plan(
            session,
            self.participant_id,
            &Mutation::ClearNotification,
            Privileges::default(),
        );
        let patch = match planned {
            Ok(Some(patch)) => patch.expecting_version(session.version),
            Ok(None) => return Some(session.version),
            Err(err) => {
                warn!(error = %err, "wizz acknowledgement rejected");
                return None;
            }
        };

        match self.store.update_session(self.session_id, patch).await {
            Ok(()) => Some(session.version + 1),
            // A newer snapshot is on its way; the clear is retried against it.
            Err(StorageError::Conflict { .. }) => {
                debug!(session_id = %self.session_id, "wizz acknowledgement raced another write");
                None
            }
            Err(err) => {
                warn!(
                    session_id = %self.session_id,
                    participant_id = %self.participant_id,
                    error = %err,
                    "failed to acknowledge wizz"
                );
                None
            }
        }
    }

    async fn close(self, reason: CloseReason) {
        let event = match &reason {
            CloseReason::Removed => Some(ClientEvent::Removed),
            CloseReason::NotFound => Some(ClientEvent::NotFound),
            CloseReason::Failed(message) => Some(ClientEvent::Failed(message.clone())),
            CloseReason::Detached => None,
        };

        info!(
            session_id = %self.session_id,
            participant_id = %self.participant_id,
            reason = ?reason,
            "session client closed"
        );
        self.cache.send_replace(CacheState::Closed(reason));
        if let Some(event) = event {
            let _ = self.events.send(event).await;
        }
    }
}
