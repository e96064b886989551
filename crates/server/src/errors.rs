//! Boundary error mapping.
//!
//! Business components fail with typed errors; this is the single place
//! that translates them into HTTP responses. Messages never carry key
//! material, hashes, or another tenant's identifiers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use funnelbot_agent::runtime::AgentError;
use funnelbot_core::errors::{AuthError, DomainError};
use funnelbot_db::repositories::{RepositoryError, VerifyError};

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Validation(String),
    NotFound(&'static str),
    Forbidden(String),
    Conflict(String),
    Isolation(String),
    Provider,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::MissingTenantHeader) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::MissingApiKey) => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::TenantNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Auth(AuthError::TenantSuspended { .. }) => StatusCode::FORBIDDEN,
            Self::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::DefaultTenantMissing { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Isolation(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provider => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Auth(error) => error.user_message(),
            Self::Validation(message) => message.clone(),
            Self::NotFound(entity) => format!("{entity} not found"),
            Self::Forbidden(message) => message.clone(),
            Self::Conflict(message) => message.clone(),
            // Internal detail stays in the logs.
            Self::Isolation(_) | Self::Internal(_) => "Internal server error".to_owned(),
            Self::Provider => {
                "The assistant is temporarily unavailable. Please try again.".to_owned()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Auth(error) => {
                tracing::warn!(error = %error, "request rejected by tenant resolution");
            }
            ApiError::Isolation(detail) => {
                tracing::error!(detail = %detail, "isolation violation aborted the request");
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
            }
            _ => {}
        }

        let status = self.status();
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self::Auth(error)
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation(message) => Self::Validation(message),
            DomainError::Conflict { entity, value } => {
                Self::Conflict(format!("{entity} '{value}' already exists"))
            }
            DomainError::NotFound(entity) => Self::NotFound(entity),
            DomainError::IsolationViolation(detail) => Self::Isolation(detail),
            DomainError::UnknownValue(unknown) => Self::Validation(unknown.to_string()),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(source) => Self::Internal(source.to_string()),
            RepositoryError::Decode(detail) => Self::Internal(detail),
            RepositoryError::Domain(domain) => domain.into(),
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(error: VerifyError) -> Self {
        match error {
            VerifyError::Auth(auth) => auth.into(),
            VerifyError::Repository(repository) => repository.into(),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::Provider(provider) => {
                tracing::warn!(error = %provider, "provider failure surfaced to caller");
                Self::Provider
            }
            AgentError::ToolRoundsExhausted(rounds) => {
                Self::Internal(format!("agent exhausted {rounds} tool rounds"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use funnelbot_core::errors::AuthError;

    use super::ApiError;

    #[test]
    fn auth_errors_map_to_documented_statuses() {
        let cases = [
            (AuthError::MissingTenantHeader, StatusCode::BAD_REQUEST),
            (AuthError::MissingApiKey, StatusCode::UNAUTHORIZED),
            (AuthError::TenantNotFound { slug: "x".to_owned() }, StatusCode::NOT_FOUND),
            (
                AuthError::TenantSuspended { slug: "x".to_owned(), status: "suspended".to_owned() },
                StatusCode::FORBIDDEN,
            ),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (
                AuthError::DefaultTenantMissing { slug: "default".to_owned() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let response = ApiError::Auth(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn internal_details_are_not_echoed_to_the_caller() {
        let error = ApiError::Internal("secret internal detail".to_owned());
        assert_eq!(error.message(), "Internal server error");

        let isolation = ApiError::Isolation("tenant x touched tenant y".to_owned());
        assert_eq!(isolation.message(), "Internal server error");
    }
}
