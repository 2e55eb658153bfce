//! Structured enforcement errors
//!
//! [`EnforcementError`] is what a caller eventually receives when a signal
//! cannot be answered with a domain response. It is `Clone` because a single
//! failed cache load is shared by every waiter and a failed task is reported
//! over the same reply channel as a successful one.

use crate::ids::EntityId;
use thiserror::Error;

/// Result type alias for enforcement operations
pub type Result<T> = std::result::Result<T, EnforcementError>;

/// Errors surfaced by the enforcement core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnforcementError {
    /// Entity is absent, or the requester may not learn that it exists
    #[error("The {entity_type} with ID '{entity_id}' could not be found or the requester had insufficient permissions to access it.")]
    NotAccessible {
        entity_type: String,
        entity_id: String,
    },

    /// Evaluated deny from the enforcer
    #[error("{message}")]
    AuthorizationDenied { entity_id: String, message: String },

    /// Signal addresses a namespace that is currently blocked
    #[error("Namespace '{namespace}' is blocked")]
    NamespaceBlocked { namespace: String },

    /// Creation restriction rejected the request
    #[error("Creating a {resource_type} in namespace '{namespace}' is not permitted")]
    CreationRestricted {
        resource_type: String,
        namespace: String,
    },

    /// Ask exhausted its retries without a reply
    #[error("Timed out: {message}")]
    Timeout { message: String },

    /// Remote side answered with a transient failure
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Reply type did not match the expected response type
    #[error("Unexpected response of type '{type_name}': {hint}")]
    UnexpectedResponse { hint: String, type_name: String },

    /// Uncaught failure while executing a task body
    #[error("Internal error (correlation-id: {}): {message}", .correlation_id.as_deref().unwrap_or("-"))]
    Internal {
        correlation_id: Option<String>,
        message: String,
        cause: Option<String>,
    },

    /// Malformed configuration, detected at construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed entity identifier
    #[error("Invalid entity id: {0}")]
    InvalidId(String),

    /// Payload could not be prepared for enforcement, e.g. an unresolvable placeholder
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl EnforcementError {
    /// Create a not-accessible error for an entity
    pub fn not_accessible(entity_id: &EntityId) -> Self {
        Self::NotAccessible {
            entity_type: entity_id.entity_type().to_string(),
            entity_id: entity_id.to_string(),
        }
    }

    /// Create an authorization-denied error
    pub fn denied(entity_id: &EntityId, message: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            entity_id: entity_id.to_string(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an unexpected-response error
    pub fn unexpected_response(hint: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            hint: hint.into(),
            type_name: type_name.into(),
        }
    }

    /// Create an internal error without correlation context
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            correlation_id: None,
            message: message.into(),
            cause: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap an arbitrary failure as an internal error, keeping the cause for logging.
    pub fn wrap(correlation_id: Option<&str>, cause: &(dyn std::error::Error + 'static)) -> Self {
        Self::Internal {
            correlation_id: correlation_id.map(str::to_string),
            message: "An unexpected error occurred during enforcement".to_string(),
            cause: Some(cause.to_string()),
        }
    }

    /// Attach a correlation id to an internal error; other variants are returned unchanged.
    pub fn with_correlation_id(self, id: &str) -> Self {
        match self {
            Self::Internal {
                correlation_id: None,
                message,
                cause,
            } => Self::Internal {
                correlation_id: Some(id.to_string()),
                message,
                cause,
            },
            other => other,
        }
    }

    /// True for failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }

    /// HTTP-like status code reported to callers
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotAccessible { .. } => 404,
            Self::AuthorizationDenied { .. } | Self::CreationRestricted { .. } => 403,
            Self::NamespaceBlocked { .. } => 409,
            Self::InvalidId(_) | Self::InvalidPayload(_) => 400,
            Self::Timeout { .. } => 504,
            Self::Unavailable(_) => 503,
            Self::UnexpectedResponse { .. } | Self::Internal { .. } | Self::Config(_) => 500,
        }
    }
}
