//! Error types for the canopy server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use canopy_types::ErrorResponse;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur while resolving credentials or proxying identity calls.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The caller omitted a required query value
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// The named profile exists but cannot produce credentials
    #[error("Invalid profile '{profile}': {reason}")]
    InvalidProfile { profile: String, reason: String },

    /// Unknown profile, or a non-sentinel name in instance principal mode
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The identity service call failed or returned an unexpected shape
    #[error("{0}")]
    UpstreamFailure(String),

    /// The instance metadata service could not provide the root compartment
    #[error("Instance metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter(name.into())
    }

    pub fn invalid_profile(profile: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            profile: profile.into(),
            reason: reason.into(),
        }
    }

    pub fn profile_not_found(profile: impl Into<String>) -> Self {
        Self::ProfileNotFound(profile.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamFailure(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convert ServerError to HTTP status code
impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::MissingParameter(_) | ServerError::InvalidProfile { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServerError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::UpstreamFailure(_)
            | ServerError::MetadataUnavailable(_)
            | ServerError::Config(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::MissingParameter(_) => "missing_parameter",
            ServerError::InvalidProfile { .. } => "invalid_profile",
            ServerError::ProfileNotFound(_) => "profile_not_found",
            ServerError::UpstreamFailure(_) | ServerError::MetadataUnavailable(_) => {
                "upstream_failure"
            }
            ServerError::Config(_) => "config_error",
            ServerError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to hand back to the caller. Internal detail stays in the log.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Config(_) | ServerError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }

        let body = ErrorResponse {
            error: self.error_type().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
