use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::session::ParticipantQuery,
    error::AppError,
    services::{session_service, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier"), ParticipantQuery),
    responses(
        (status = 200, description = "Session snapshots and notifications", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown session"),
        (status = 410, description = "Participant was removed")
    )
)]
/// Stream every snapshot of a session to one participant.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ParticipantQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (client, events) = session_service::subscribe(&state, id, query.participant_id).await?;
    info!(session_id = %id, participant_id = %query.participant_id, "new session SSE connection");
    Ok(sse_service::to_sse_stream(
        client,
        events,
        state.config().sse_keep_alive(),
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{id}/events", get(session_stream))
}
