//! In-process session store. Each document lives in its own `watch` channel,
//! so a subscriber always starts from the latest committed state and never
//! replays history.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{StreamExt, future::BoxFuture, stream};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use crate::dao::{
    models::{SessionEntity, SessionPatch, SessionQuery},
    session_store::{SessionStore, SnapshotEvent, SnapshotStream},
    storage::{StorageError, StorageResult},
};

/// [`SessionStore`] kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<Uuid, watch::Sender<Option<SessionEntity>>>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&self, session: SessionEntity) -> StorageResult<()> {
        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists { id: session.id }),
            Entry::Vacant(slot) => {
                let (sender, _receiver) = watch::channel(Some(session));
                slot.insert(sender);
                Ok(())
            }
        }
    }

    fn find(&self, id: Uuid) -> Option<SessionEntity> {
        self.sessions
            .get(&id)
            .and_then(|sender| sender.borrow().clone())
    }

    fn update(&self, id: Uuid, patch: &SessionPatch) -> StorageResult<()> {
        let Some(sender) = self.sessions.get(&id) else {
            return Err(StorageError::NotFound { id });
        };

        let mut outcome = Ok(());
        sender.send_if_modified(|slot| match slot {
            Some(session) => match patch.apply_to(session) {
                Ok(()) => true,
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            },
            None => {
                outcome = Err(StorageError::NotFound { id });
                false
            }
        });

        outcome
    }

    fn delete(&self, id: Uuid) -> bool {
        match self.sessions.remove(&id) {
            Some((_, sender)) => {
                // Subscribers observe the tombstone, then the closed channel ends their stream.
                sender.send_replace(None);
                true
            }
            None => false,
        }
    }

    fn query(&self, query: &SessionQuery) -> Vec<SessionEntity> {
        let documents = self
            .sessions
            .iter()
            .filter_map(|entry| entry.value().borrow().clone())
            .collect::<Vec<_>>();
        query.apply(documents)
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.create(session);
        Box::pin(async move { result })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let result = self.find(id);
        Box::pin(async move { Ok(result) })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.update(id, &patch);
        Box::pin(async move { result })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let deleted = self.delete(id);
        Box::pin(async move { Ok(deleted) })
    }

    fn query_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let result = self.query(&query);
        Box::pin(async move { Ok(result) })
    }

    fn subscribe(&self, id: Uuid) -> SnapshotStream {
        let Some(receiver) = self.sessions.get(&id).map(|sender| sender.subscribe()) else {
            return stream::once(async { Ok(SnapshotEvent::NotFound) }).boxed();
        };

        WatchStream::new(receiver)
            .map(|slot| {
                Ok(match slot {
                    Some(session) => SnapshotEvent::Snapshot(session),
                    None => SnapshotEvent::NotFound,
                })
            })
            .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::time::timeout;

    use super::*;
    use crate::dao::models::ParticipantEntity;

    fn session(created_at: i64) -> SessionEntity {
        let facilitator_id = Uuid::new_v4();
        SessionEntity {
            id: Uuid::new_v4(),
            facilitator_id,
            facilitator_name: "Alice".into(),
            items: Vec::new(),
            participants: vec![ParticipantEntity {
                id: facilitator_id,
                name: "Alice".into(),
                is_pm: true,
                current_vote: None,
            }],
            current_item_id: None,
            votes_revealed: false,
            notify_target_id: None,
            created_at,
            version: 0,
        }
    }

    async fn next_event(stream: &mut SnapshotStream) -> SnapshotEvent {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("subscription stalled")
            .expect("subscription ended")
            .expect("subscription failed")
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemorySessionStore::new();
        let doc = session(1);
        store.create_session(doc.clone()).await.unwrap();

        let err = store.create_session(doc).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemorySessionStore::new();
        let err = store
            .update_session(Uuid::new_v4(), SessionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn subscriber_gets_current_state_then_each_commit() {
        let store = MemorySessionStore::new();
        let doc = session(1);
        let id = doc.id;
        store.create_session(doc).await.unwrap();

        let mut stream = store.subscribe(id);
        match next_event(&mut stream).await {
            SnapshotEvent::Snapshot(current) => assert!(!current.votes_revealed),
            other => panic!("expected snapshot, got {other:?}"),
        }

        store
            .update_session(
                id,
                SessionPatch {
                    votes_revealed: Some(true),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        match next_event(&mut stream).await {
            SnapshotEvent::Snapshot(current) => {
                assert!(current.votes_revealed);
                assert_eq!(current.version, 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deletion_ends_subscriptions_with_not_found() {
        let store = MemorySessionStore::new();
        let doc = session(1);
        let id = doc.id;
        store.create_session(doc).await.unwrap();

        let mut stream = store.subscribe(id);
        next_event(&mut stream).await;

        assert!(store.delete_session(id).await.unwrap());
        assert_eq!(next_event(&mut stream).await, SnapshotEvent::NotFound);
        assert!(store.find_session(id).await.unwrap().is_none());
        assert!(!store.delete_session(id).await.unwrap());
    }

    #[tokio::test]
    async fn subscribing_to_unknown_session_reports_not_found() {
        let store = MemorySessionStore::new();
        let mut stream = store.subscribe(Uuid::new_v4());
        assert_eq!(next_event(&mut stream).await, SnapshotEvent::NotFound);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_patches_keep_last_write_per_field() {
        let store = MemorySessionStore::new();
        let doc = session(1);
        let id = doc.id;
        let pm = doc.facilitator_id;
        store.create_session(doc.clone()).await.unwrap();

        // Two writers computed their patches from the same snapshot.
        let mut voted = doc.participants.clone();
        voted[0].current_vote = Some(5);
        let first = SessionPatch {
            participants: Some(voted),
            ..SessionPatch::default()
        };
        let second = SessionPatch {
            participants: Some(doc.participants.clone()),
            notify_target_id: Some(Some(pm)),
            ..SessionPatch::default()
        };

        store.update_session(id, first).await.unwrap();
        store.update_session(id, second).await.unwrap();

        let stored = store.find_session(id).await.unwrap().unwrap();
        assert_eq!(stored.participants[0].current_vote, None);
        assert_eq!(stored.notify_target_id, Some(pm));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn query_orders_by_creation_time() {
        let store = MemorySessionStore::new();
        for created_at in [30, 10, 20] {
            store.create_session(session(created_at)).await.unwrap();
        }

        let oldest = store
            .query_sessions(SessionQuery {
                limit: Some(2),
                ..SessionQuery::default()
            })
            .await
            .unwrap();

        let created = oldest.iter().map(|doc| doc.created_at).collect::<Vec<_>>();
        assert_eq!(created, vec![10, 20]);
    }
}
