#[cfg(feature = "couch-store")]
/// CouchDB backend.
pub mod couchdb;
/// In-process backend, also used by tests.
pub mod memory;
#[cfg(feature = "mongo-store")]
/// MongoDB backend.
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use uuid::Uuid;

use crate::dao::models::{SessionEntity, SessionPatch, SessionQuery};
use crate::dao::storage::StorageResult;

/// Item delivered by a session subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEvent {
    /// Full current document, delivered on subscribe and after every commit.
    Snapshot(SessionEntity),
    /// The document does not exist (anymore). The stream ends after this item.
    NotFound,
}

/// Live feed of a single session document. Dropping the stream unsubscribes.
pub type SnapshotStream = BoxStream<'static, StorageResult<SnapshotEvent>>;

/// Abstraction over the shared document store holding session documents.
///
/// Writes are not transactional against each other: `update_session` only
/// replaces the fields named in the patch, so the last committed write wins
/// for every field two concurrent patches both touch.
pub trait SessionStore: Send + Sync {
    /// Write a brand-new session document.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Read the current document, if any.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Replace the fields named by `patch`; fails when the document is missing.
    fn update_session(&self, id: Uuid, patch: SessionPatch)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Remove the document, returning whether it existed.
    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    /// List documents matching `query`, used by the retention sweep.
    fn query_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Subscribe to a document: current state first, then one item per commit.
    fn subscribe(&self, id: Uuid) -> SnapshotStream;
    /// Cheap round-trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
