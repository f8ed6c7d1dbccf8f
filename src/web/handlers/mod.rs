pub mod connections;
pub mod history;
pub mod session;
pub mod system;

use crate::session::{ResolutionError, WorkflowError};
use crate::store::StoreError;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use tracing::{error, warn};

pub type ApiError = (StatusCode, String);

/// Header carrying the authenticated user id, set by the fronting auth layer.
pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts for.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match user {
            Some(user) => Ok(CurrentUser(user.to_string())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "User is not authenticated".to_string(),
            )),
        }
    }
}

pub fn workflow_error(err: WorkflowError) -> ApiError {
    let status = match &err {
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Resolution(ResolutionError::ConfigNotFound) => StatusCode::NOT_FOUND,
        WorkflowError::Resolution(ResolutionError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        WorkflowError::Backend(_) => StatusCode::BAD_GATEWAY,
        WorkflowError::InvalidTransition { .. } | WorkflowError::Stale => StatusCode::CONFLICT,
    };
    if status.is_server_error() {
        error!("Workflow error: {}", err);
    } else {
        warn!("Workflow error: {}", err);
    }
    (status, err.to_string())
}

pub fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        other => {
            error!("Store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}
