use std::{sync::Arc, time::Duration};

use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    change_stream::event::OperationType,
    options::{FullDocumentType, IndexOptions},
};
use tokio::{sync::RwLock, time::sleep};
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoSessionDocument, doc_id, query_filter, versioned_doc_id},
};
use crate::dao::{
    models::{SESSION_COLLECTION_NAME, SessionEntity, SessionPatch, SessionQuery},
    session_store::{SessionStore, SnapshotEvent, SnapshotStream},
    storage::{StorageError, StorageResult},
};

const MAX_UPDATE_ATTEMPTS: u32 = 5;
const CONNECT_ATTEMPTS: u32 = 10;
const FIRST_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Session store backed by a MongoDB collection and its change streams.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

/// Handles of one live connection.
struct MongoState {
    database: Database,
    sessions: Collection<MongoSessionDocument>,
}

impl MongoState {
    /// Build a client, wait until the server answers a ping, then make sure the
    /// session collection carries its `createdAt` index for retention queries.
    async fn open(config: &MongoConfig) -> MongoResult<Self> {
        let client = Client::with_options(config.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&config.database_name);

        let mut attempt = 1;
        let mut backoff = FIRST_BACKOFF;
        while let Err(source) = database.run_command(doc! { "ping": 1 }).await {
            if attempt >= CONNECT_ATTEMPTS {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            debug!(attempt, error = %source, "MongoDB not reachable yet");
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            attempt += 1;
        }

        let sessions = database.collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME);
        sessions
            .create_index(created_at_index())
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "createdAt",
                source,
            })?;
        debug!(
            database = %config.database_name,
            collection = SESSION_COLLECTION_NAME,
            "MongoDB session collection ready"
        );

        Ok(Self { database, sessions })
    }
}

fn created_at_index() -> IndexModel {
    IndexModel::builder()
        .keys(doc! { "createdAt": 1 })
        .options(
            IndexOptions::builder()
                .name(Some("session_created_at_idx".to_owned()))
                .build(),
        )
        .build()
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let fresh = MongoState::open(&self.config).await?;
        *self.state.write().await = fresh;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Connect to MongoDB and prepare the session collection.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let state = MongoState::open(&config).await?;
        Ok(Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(state),
                config,
            }),
        })
    }

    async fn collection(&self) -> Collection<MongoSessionDocument> {
        self.inner.state.read().await.sessions.clone()
    }

    async fn insert(&self, session: SessionEntity) -> StorageResult<()> {
        let id = session.id;
        let document = MongoSessionDocument::from(session);
        let collection = self.collection().await;
        match collection.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::AlreadyExists { id }),
            Err(source) => Err(MongoDaoError::InsertSession { id, source }.into()),
        }
    }

    async fn find(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        let collection = self.collection().await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { id, source })?;

        document.map(SessionEntity::try_from).transpose()
    }

    /// Read, patch and replace while the stored version is unchanged. A
    /// replace matching nothing means another writer committed first: re-read
    /// and re-apply so only the patched fields are replaced.
    async fn update(&self, id: Uuid, patch: SessionPatch) -> StorageResult<()> {
        let collection = self.collection().await;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(mut session) = self.find(id).await? else {
                return Err(StorageError::NotFound { id });
            };

            let read_version = session.version;
            patch.apply_to(&mut session)?;

            let result = collection
                .replace_one(
                    versioned_doc_id(id, read_version),
                    MongoSessionDocument::from(session),
                )
                .await
                .map_err(|source| MongoDaoError::ReplaceSession { id, source })?;

            if result.matched_count > 0 {
                return Ok(());
            }
            debug!(session_id = %id, attempt, "MongoDB version moved; retrying update");
        }

        Err(MongoDaoError::UpdateConflict {
            id,
            attempts: MAX_UPDATE_ATTEMPTS,
        }
        .into())
    }

    async fn delete(&self, id: Uuid) -> MongoResult<bool> {
        let collection = self.collection().await;
        let result = collection
            .delete_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
        Ok(result.deleted_count > 0)
    }

    async fn query(&self, query: SessionQuery) -> MongoResult<Vec<SessionEntity>> {
        let collection = self.collection().await;
        let mut action = collection
            .find(query_filter(&query))
            .sort(doc! { "createdAt": 1 });
        if let Some(limit) = query.limit {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let documents: Vec<MongoSessionDocument> = action
            .await
            .map_err(|source| MongoDaoError::QuerySessions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QuerySessions { source })?;

        documents.into_iter().map(SessionEntity::try_from).collect()
    }

    fn watch(&self, id: Uuid) -> SnapshotStream {
        let store = self.clone();
        Box::pin(async_stream::stream! {
            let collection = store.collection().await;

            // Open the change stream before the initial read so no commit falls in between.
            let opened = collection
                .watch()
                .pipeline([doc! { "$match": { "documentKey._id": id.to_string() } }])
                .full_document(FullDocumentType::UpdateLookup)
                .await;
            let mut changes = match opened {
                Ok(changes) => changes,
                Err(source) => {
                    yield Err(StorageError::from(MongoDaoError::WatchSession { id, source }));
                    return;
                }
            };

            match store.find(id).await {
                Ok(Some(session)) => yield Ok(SnapshotEvent::Snapshot(session)),
                Ok(None) => {
                    yield Ok(SnapshotEvent::NotFound);
                    return;
                }
                Err(err) => {
                    yield Err(StorageError::from(err));
                    return;
                }
            }

            while let Some(next) = changes.next().await {
                let event = match next {
                    Ok(event) => event,
                    Err(source) => {
                        yield Err(StorageError::from(MongoDaoError::WatchSession { id, source }));
                        return;
                    }
                };

                match event.operation_type {
                    OperationType::Delete | OperationType::Drop | OperationType::Invalidate => {
                        yield Ok(SnapshotEvent::NotFound);
                        return;
                    }
                    _ => {}
                }

                let Some(document) = event.full_document else {
                    continue;
                };
                match SessionEntity::try_from(document) {
                    Ok(session) => yield Ok(SnapshotEvent::Snapshot(session)),
                    Err(err) => {
                        yield Err(StorageError::from(err));
                        return;
                    }
                }
            }
        })
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert(session).await })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find(id).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update(id, patch).await })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete(id).await.map_err(Into::into) })
    }

    fn query_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.query(query).await.map_err(Into::into) })
    }

    fn subscribe(&self, id: Uuid) -> SnapshotStream {
        self.watch(id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
