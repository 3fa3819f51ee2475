use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{dao::storage::StorageError, services::mutations::MutationError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable or rejected a write.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Caller lacks the role the operation needs.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller is no longer on the session roster.
    #[error("participant `{participant_id}` was removed from the session")]
    RemovedFromSession { participant_id: Uuid },
}

impl ServiceError {
    /// [`ServiceError::NotFound`] for a missing session.
    pub fn session_not_found(session_id: Uuid) -> Self {
        ServiceError::NotFound(format!("session `{session_id}` does not exist"))
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id } => ServiceError::session_not_found(id),
            StorageError::Conflict { .. } => ServiceError::InvalidState(err.to_string()),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<MutationError> for ServiceError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::UnknownParticipant { participant_id } => {
                ServiceError::RemovedFromSession { participant_id }
            }
            MutationError::NotFacilitator { .. } => ServiceError::Unauthorized(err.to_string()),
            MutationError::InvalidInput(message) => ServiceError::InvalidInput(message),
            MutationError::ItemNotFound { .. } => ServiceError::NotFound(err.to_string()),
            MutationError::CannotKickFacilitator
            | MutationError::InvalidNotificationTarget { .. } => {
                ServiceError::InvalidInput(err.to_string())
            }
            MutationError::InvalidTransition(_)
            | MutationError::NotAllVoted { .. }
            | MutationError::NoNextItem => ServiceError::InvalidState(err.to_string()),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The caller has been removed and must leave the session.
    #[error("gone: {0}")]
    Gone(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            removed @ ServiceError::RemovedFromSession { .. } => {
                AppError::Gone(removed.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::workflow::{InvalidTransition, SessionEvent, SessionPhase};

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn mutation_failures_map_to_client_errors() {
        let id = Uuid::new_v4();
        assert_eq!(
            status_of(MutationError::UnknownParticipant { participant_id: id }.into()),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(MutationError::NotFacilitator { participant_id: id }.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(MutationError::InvalidInput("blank".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(MutationError::NotAllVoted { pending: 2 }.into()),
            StatusCode::CONFLICT
        );
        let invalid = InvalidTransition {
            from: SessionPhase::NoItemSelected,
            event: SessionEvent::RevealVotes,
        };
        assert_eq!(
            status_of(MutationError::from(invalid).into()),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn storage_failures_map_to_availability_errors() {
        let id = Uuid::new_v4();
        assert_eq!(
            status_of(StorageError::NotFound { id }.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                StorageError::Conflict {
                    id,
                    expected: 1,
                    actual: 2
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
    }
}
