use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent when a nudge addressed to the subscriber arrived; it is acknowledged server side.
pub struct WizzEvent {
    /// Session the nudge was sent in.
    pub session_id: Uuid,
    /// Nudged participant.
    pub participant_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent once the subscriber no longer appears on the roster. The stream ends after it.
pub struct RemovedEvent {
    /// Session the participant was removed from.
    pub session_id: Uuid,
    /// Removed participant.
    pub participant_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent when the session document is gone. The stream ends after it.
pub struct NotFoundEvent {
    /// Session that no longer exists.
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when the subscription failed; the client should reconnect.
pub struct ErrorEvent {
    /// Human readable reason.
    pub message: String,
}
