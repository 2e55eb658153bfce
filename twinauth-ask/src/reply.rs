//! Raw replies and casting them to the expected response type

use std::any::Any;
use std::fmt;
use twinauth_core::{EnforcementError, Result};

/// Raw reply of an ask target
///
/// A target answers either with an arbitrary response value, whose concrete
/// type is only known to the caller, or with a structured error carrier.
pub enum Reply {
    Response {
        value: Box<dyn Any + Send>,
        type_name: &'static str,
    },
    Error(EnforcementError),
}

impl Reply {
    pub fn response<T: Any + Send>(value: T) -> Self {
        Reply::Response {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn error(error: EnforcementError) -> Self {
        Reply::Error(error)
    }

    /// Type name of the carried value, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Reply::Response { type_name, .. } => type_name,
            Reply::Error(_) => std::any::type_name::<EnforcementError>(),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Response { type_name, .. } => f
                .debug_struct("Response")
                .field("type_name", type_name)
                .finish_non_exhaustive(),
            Reply::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// Cast a reply to `R`.
///
/// Structured error replies are unwrapped into their embedded error. Any
/// other type mismatch becomes [`EnforcementError::UnexpectedResponse`]
/// carrying `hint` and the actual type name.
pub fn cast_reply<R: Any>(reply: Reply, hint: &str) -> Result<R> {
    match reply {
        Reply::Error(error) => Err(error),
        Reply::Response { value, type_name } => match value.downcast::<R>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(EnforcementError::unexpected_response(hint, type_name)),
        },
    }
}
