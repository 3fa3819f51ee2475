use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB storage operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures raised by the MongoDB storage implementation.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver refused the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered a ping while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Index creation failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// Insert failed for a reason other than a duplicate id.
    #[error("failed to insert session `{id}`")]
    InsertSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Reading a session failed.
    #[error("failed to load session `{id}`")]
    LoadSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Replacing a session failed.
    #[error("failed to replace session `{id}`")]
    ReplaceSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Deleting a session failed.
    #[error("failed to delete session `{id}`")]
    DeleteSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// The retention query failed.
    #[error("failed to query sessions")]
    QuerySessions {
        #[source]
        source: MongoError,
    },
    /// The change stream could not be opened or broke.
    #[error("change stream on session `{id}` failed")]
    WatchSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// A stored `_id` is not a UUID.
    #[error("stored session document has malformed id `{raw}`")]
    MalformedId {
        raw: String,
        #[source]
        source: uuid::Error,
    },
    /// Every update attempt lost against a concurrent writer.
    #[error("gave up updating session `{id}` after {attempts} concurrent writes")]
    UpdateConflict { id: Uuid, attempts: u32 },
}

/// Whether the server rejected an insert because the `_id` is taken.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write)) if write.code == DUPLICATE_KEY_CODE
    )
}
