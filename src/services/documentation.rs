use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the planning poker backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::join_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::perform_action,
        crate::routes::sessions::delete_session,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::CreateSessionResponse,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::JoinSessionResponse,
            crate::dto::session::ActionRequest,
            crate::dto::session::SessionAction,
            crate::dto::session::NewItemPayload,
            crate::dto::session::VoteValue,
            crate::dto::session::ActionResponse,
            crate::dto::session::ActionOutcome,
            crate::dto::session::SessionView,
            crate::dto::session::PhaseView,
            crate::dto::session::WorkItemView,
            crate::dto::session::ItemStatusView,
            crate::dto::session::RecordedVoteView,
            crate::dto::session::ParticipantView,
            crate::dto::sse::WizzEvent,
            crate::dto::sse::RemovedEvent,
            crate::dto::sse::NotFoundEvent,
            crate::dto::sse::ErrorEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lifecycle and actions"),
        (name = "sse", description = "Live session snapshots over server-sent events"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_session_routes() {
        let doc = ApiDoc::openapi();
        let paths = doc.paths.paths.keys().cloned().collect::<Vec<_>>();
        for expected in [
            "/sessions",
            "/sessions/{id}",
            "/sessions/{id}/actions",
            "/sessions/{id}/events",
            "/sessions/{id}/participants",
            "/healthcheck",
        ] {
            assert!(paths.iter().any(|path| path == expected), "missing {expected}");
        }
    }
}
