use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        ActionRequest, ActionResponse, ClientAction, CreateSessionRequest, CreateSessionResponse,
        JoinSessionRequest, JoinSessionResponse, ParticipantQuery, SessionView,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes driving the session lifecycle: creation, joining, actions and deletion.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/participants", post(join_session))
        .route("/sessions/{id}/actions", post(perform_action))
}

/// Sweep stale sessions and open a new one owned by the caller.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Blank facilitator name"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let created = session_service::create_session(&state, &payload.facilitator_name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Join an existing session by id.
#[utoipa::path(
    post,
    path = "/sessions/{id}/participants",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = JoinSessionRequest,
    responses(
        (status = 201, description = "Participant added", body = JoinSessionResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<(StatusCode, Json<JoinSessionResponse>), AppError> {
    let joined = session_service::join_session(&state, id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(joined)))
}

/// Latest snapshot of the session as the given participant sees it.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier"), ParticipantQuery),
    responses(
        (status = 200, description = "Session snapshot", body = SessionView),
        (status = 404, description = "Unknown session"),
        (status = 410, description = "Participant was removed")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ParticipantQuery>,
) -> Result<Json<SessionView>, AppError> {
    let view = session_service::fetch_view(&state, id, query.participant_id).await?;
    Ok(Json(view))
}

/// Execute one action on behalf of a participant against the latest snapshot.
#[utoipa::path(
    post,
    path = "/sessions/{id}/actions",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = ActionRequest,
    responses(
        (status = 200, description = "Action handled", body = ActionResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Facilitator only"),
        (status = 409, description = "Not allowed in the current phase"),
        (status = 410, description = "Participant was removed")
    )
)]
pub async fn perform_action(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let action = ClientAction::try_from(payload.action).map_err(AppError::BadRequest)?;
    let outcome =
        session_service::execute_action(&state, id, payload.participant_id, action).await?;
    Ok(Json(ActionResponse { outcome }))
}

/// Delete the whole session. Facilitator only.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier"), ParticipantQuery),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 401, description = "Facilitator only"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ParticipantQuery>,
) -> Result<StatusCode, AppError> {
    session_service::delete_session(&state, id, query.participant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
