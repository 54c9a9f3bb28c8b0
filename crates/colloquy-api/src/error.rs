use axum::http::StatusCode;
use tracing::error;

use colloquy_types::error::{NotFoundError, ServiceError};

/// Map a service failure onto the status the client sees. Server-side
/// failures are logged here; their detail never reaches the response.
pub fn into_status(err: ServiceError) -> StatusCode {
    match err {
        ServiceError::Auth(_) => StatusCode::UNAUTHORIZED,
        // A valid token for a user that no longer exists.
        ServiceError::NotFound(NotFoundError::User) => StatusCode::UNAUTHORIZED,
        ServiceError::NotFound(NotFoundError::Conversation(_)) => StatusCode::NOT_FOUND,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::Persistence(e) => {
            error!("Persistence failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ServiceError::Internal(e) => {
            error!("Internal failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
