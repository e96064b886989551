use thiserror::Error;

/// A string did not name any variant of a persisted enum.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value `{value}`")]
pub struct UnknownEnumValue {
    pub kind: &'static str,
    pub value: String,
}

/// Authentication failures raised before any business logic runs.
///
/// The resolution middleware is the only place these are translated into
/// boundary responses; nothing downstream re-checks credentials.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing tenant header")]
    MissingTenantHeader,
    #[error("missing API key header")]
    MissingApiKey,
    #[error("tenant `{slug}` not found")]
    TenantNotFound { slug: String },
    #[error("tenant `{slug}` is not active (status: {status})")]
    TenantSuspended { slug: String, status: String },
    #[error("invalid API key")]
    InvalidCredentials,
    #[error("default tenant `{slug}` is not configured")]
    DefaultTenantMissing { slug: String },
}

impl AuthError {
    /// Message safe to return to the caller. Never includes key material
    /// or another tenant's identifiers.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingTenantHeader => "Missing tenant header".to_owned(),
            Self::MissingApiKey => "Missing API key header".to_owned(),
            Self::TenantNotFound { slug } => format!("Tenant '{slug}' not found"),
            Self::TenantSuspended { slug, .. } => format!("Tenant '{slug}' is not active"),
            Self::InvalidCredentials => "Invalid API key".to_owned(),
            Self::DefaultTenantMissing { .. } => "Default tenant not configured".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} `{value}` already exists")]
    Conflict { entity: &'static str, value: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cross-tenant reference rejected: {0}")]
    IsolationViolation(String),
    #[error(transparent)]
    UnknownValue(#[from] UnknownEnumValue),
}

#[cfg(test)]
mod tests {
    use super::{AuthError, DomainError, UnknownEnumValue};

    #[test]
    fn auth_error_messages_never_mention_keys() {
        let errors = [
            AuthError::MissingTenantHeader,
            AuthError::MissingApiKey,
            AuthError::TenantNotFound { slug: "acme".to_owned() },
            AuthError::TenantSuspended { slug: "acme".to_owned(), status: "suspended".to_owned() },
            AuthError::InvalidCredentials,
            AuthError::DefaultTenantMissing { slug: "default".to_owned() },
        ];

        for error in errors {
            let message = error.user_message();
            assert!(!message.contains('$'), "hash material leaked: {message}");
            assert!(!message.to_ascii_lowercase().contains("hash"));
        }
    }

    #[test]
    fn suspended_message_omits_concrete_status() {
        let error =
            AuthError::TenantSuspended { slug: "acme".to_owned(), status: "cancelled".to_owned() };
        assert_eq!(error.user_message(), "Tenant 'acme' is not active");
    }

    #[test]
    fn unknown_enum_value_formats_kind_and_value() {
        let error: DomainError =
            UnknownEnumValue { kind: "funnel stage", value: "warmish".to_owned() }.into();
        assert_eq!(error.to_string(), "unknown funnel stage value `warmish`");
    }
}
