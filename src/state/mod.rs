/// Session domain model decoded from documents.
pub mod session;
/// Wizz throttle and other client-local controls.
pub mod wizz;
/// Derived workflow phases and their transitions.
pub mod workflow;

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::session_store::SessionStore, error::ServiceError,
    services::client::SessionClient,
};

use self::wizz::LocalControls;

/// Cheaply clonable handle on the [`AppState`].
pub type SharedState = Arc<AppState>;

/// Controls of one client, shared by its event stream and its action requests.
pub type SharedControls = Arc<Mutex<LocalControls>>;

/// Central application state holding the store handle and client-local controls.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    controls: DashMap<(Uuid, Uuid), SharedControls>,
    /// Live clients, owned by their event streams.
    clients: DashMap<(Uuid, Uuid), Weak<SessionClient>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            controls: DashMap::new(),
            clients: DashMap::new(),
        })
    }

    /// Loaded application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] while none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Local controls of `participant_id` in `session_id`, created on first use.
    pub fn controls_for(&self, session_id: Uuid, participant_id: Uuid) -> SharedControls {
        self.controls
            .entry((session_id, participant_id))
            .or_insert_with(|| Arc::new(Mutex::new(LocalControls::new(self.config.wizz()))))
            .clone()
    }

    /// Number of (session, participant) pairs holding local controls.
    pub fn tracked_participants(&self) -> usize {
        self.controls.len()
    }

    /// Remember `client` so actions of its participant plan against its cache.
    pub fn register_client(&self, client: &Arc<SessionClient>) {
        self.clients.retain(|_, client| client.strong_count() > 0);
        self.clients.insert(
            (client.session_id(), client.participant_id()),
            Arc::downgrade(client),
        );
    }

    /// Client currently streaming `session_id` to `participant_id`, if any.
    pub fn live_client(&self, session_id: Uuid, participant_id: Uuid) -> Option<Arc<SessionClient>> {
        let key = (session_id, participant_id);
        let client = self.clients.get(&key).and_then(|client| client.upgrade());
        if client.is_none() {
            self.clients.remove_if(&key, |_, client| client.strong_count() == 0);
        }
        client
    }

    /// Forget everything kept for a participant that left.
    pub fn release_participant(&self, session_id: Uuid, participant_id: Uuid) {
        self.controls.remove(&(session_id, participant_id));
        self.clients.remove(&(session_id, participant_id));
    }

    /// Forget everything kept for a session that is gone.
    pub fn release_session(&self, session_id: Uuid) {
        self.controls.retain(|(session, _), _| *session != session_id);
        self.clients.retain(|(session, _), _| *session != session_id);
    }
}
