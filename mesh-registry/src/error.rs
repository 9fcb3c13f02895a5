//! Error taxonomy for the registry service.
//!
//! `StoreError`/`ResolverError` are module-scoped and bridge into the single
//! `ApiError` surfaced at the HTTP boundary via `#[from]`, matching the
//! `CoreError`/module-error split used on the agent side.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors raised by [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflicting registration: ({namespace}, {name}) already held by agent '{held_by}'")]
    ConflictingRegistration {
        namespace: String,
        name: String,
        held_by: String,
    },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("agent '{0}' not found")]
    AgentNotFound(String),
}

/// Errors raised by [`crate::resolver::resolve`].
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("invalid version constraint '{constraint}': {cause}")]
    InvalidVersionConstraint { constraint: String, cause: semver::Error },

    #[error("invalid version '{version}': {cause}")]
    InvalidVersion { version: String, cause: semver::Error },
}

/// Top-level error type surfaced by the HTTP API.
///
/// Bridges the module-scoped errors above into the HTTP status codes and JSON
/// error body shape described in §7/§6: `{"error": "<kind>", "message": "<display>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("malformed request body: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Store(StoreError::ConflictingRegistration { .. }) => "CONFLICT",
            ApiError::Store(StoreError::InvalidSpec(_)) => "INVALID_SPEC",
            ApiError::Store(StoreError::AgentNotFound(_)) => "NOT_FOUND",
            ApiError::Resolver(_) => "INVALID_SPEC",
            ApiError::BadRequest(_) => "INVALID_SPEC",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(StoreError::ConflictingRegistration { .. }) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::InvalidSpec(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::AgentNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Resolver(_) => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_registration_maps_to_409() {
        let err = ApiError::Store(StoreError::ConflictingRegistration {
            namespace: "default".to_string(),
            name: "hello".to_string(),
            held_by: "hello".to_string(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "CONFLICT");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::Store(StoreError::AgentNotFound("ghost".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
