//! Unified error handling for the HTTP surface.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::relay::RelayError;
use crate::services::linking::LinkingError;
use crate::services::verification::ConsumeError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Provider operation failed.
    #[error("Provider error: {0}")]
    Relay(#[from] RelayError),

    /// Linking flow failed.
    #[error("Linking error: {0}")]
    Linking(#[from] LinkingError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request failed authentication.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Relay(e) => relay_status(e),
            Self::Linking(e) => match e {
                LinkingError::Relay(relay) => relay_status(relay),
                LinkingError::Verification(consume) => match consume {
                    ConsumeError::NotFound => StatusCode::NOT_FOUND,
                    ConsumeError::Expired => StatusCode::GONE,
                    ConsumeError::Mismatch => StatusCode::UNPROCESSABLE_ENTITY,
                },
                LinkingError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
                LinkingError::NotLinked | LinkingError::KeyAlreadyConnected => {
                    StatusCode::CONFLICT
                }
                // Actionable: the merchant can do this manually in the
                // provider dashboard, so forbid rather than conflict.
                LinkingError::DegradedIdentity => StatusCode::FORBIDDEN,
                LinkingError::AccountCreation(_) => StatusCode::BAD_GATEWAY,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Message safe to expose to clients.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Relay(e) => relay_public_message(e),
            Self::Linking(LinkingError::Relay(e)) => relay_public_message(e),
            Self::Linking(LinkingError::Repository(_)) => "Internal server error".to_string(),
            Self::Linking(LinkingError::AccountCreation(_)) => {
                "Unable to create or verify the provider account".to_string()
            }
            _ => self.to_string(),
        }
    }
}

fn relay_status(e: &RelayError) -> StatusCode {
    match e {
        RelayError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::AlreadyExists(_) => StatusCode::CONFLICT,
        RelayError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::Http(_) | RelayError::Api { .. } | RelayError::Parse(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn relay_public_message(e: &RelayError) -> String {
    match e {
        RelayError::Http(_) | RelayError::Api { .. } | RelayError::Parse(_) => {
            "Provider is unavailable".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.public_message() }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("settings".to_string());
        assert_eq!(err.to_string(), "Not found: settings");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("x".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::BadRequest("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Internal("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_relay_error_status_mapping() {
        assert_eq!(
            get_status(AppError::Relay(RelayError::NotConfigured("system token"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(AppError::Relay(RelayError::AlreadyExists("a@b.com".to_string()))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::Relay(RelayError::InvalidInput("bad redirect".to_string()))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_verification_error_status_mapping() {
        assert_eq!(
            get_status(AppError::Linking(LinkingError::Verification(ConsumeError::Expired))),
            StatusCode::GONE
        );
        assert_eq!(
            get_status(AppError::Linking(LinkingError::Verification(ConsumeError::Mismatch))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(AppError::Linking(LinkingError::DegradedIdentity)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::Linking(LinkingError::KeyAlreadyConnected)),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = AppError::Database(RepositoryError::DataCorruption(
            "invalid email in database".to_string(),
        ));
        assert_eq!(err.public_message(), "Internal server error");
    }
}
