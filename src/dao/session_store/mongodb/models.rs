use mongodb::bson::{Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{ParticipantEntity, SessionEntity, SessionQuery, WorkItemEntity};

use super::error::{MongoDaoError, MongoResult};

/// Session as laid out in the `sessions` collection. The `_id` is the textual
/// session id so change-stream filters can match on it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub facilitator_id: Uuid,
    pub facilitator_name: String,
    #[serde(default)]
    pub items: Vec<WorkItemEntity>,
    #[serde(default)]
    pub participants: Vec<ParticipantEntity>,
    #[serde(default)]
    pub current_item_id: Option<Uuid>,
    #[serde(default)]
    pub votes_revealed: bool,
    #[serde(default)]
    pub notify_target_id: Option<Uuid>,
    pub created_at: i64,
    #[serde(default)]
    pub version: i64,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            facilitator_id: value.facilitator_id,
            facilitator_name: value.facilitator_name,
            items: value.items,
            participants: value.participants,
            current_item_id: value.current_item_id,
            votes_revealed: value.votes_revealed,
            notify_target_id: value.notify_target_id,
            created_at: value.created_at,
            version: version_to_bson(value.version),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        let id = Uuid::parse_str(&value.id).map_err(|source| MongoDaoError::MalformedId {
            raw: value.id.clone(),
            source,
        })?;

        Ok(Self {
            id,
            facilitator_id: value.facilitator_id,
            facilitator_name: value.facilitator_name,
            items: value.items,
            participants: value.participants,
            current_item_id: value.current_item_id,
            votes_revealed: value.votes_revealed,
            notify_target_id: value.notify_target_id,
            created_at: value.created_at,
            version: u64::try_from(value.version).unwrap_or_default(),
        })
    }
}

pub fn version_to_bson(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

pub fn doc_id(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

/// Filter matching `id` only while it is still at `version`.
pub fn versioned_doc_id(id: Uuid, version: u64) -> Document {
    doc! { "_id": id.to_string(), "version": version_to_bson(version) }
}

pub fn query_filter(query: &SessionQuery) -> Document {
    match query.created_before {
        Some(cutoff) => doc! { "createdAt": { "$lt": cutoff } },
        None => doc! {},
    }
}
