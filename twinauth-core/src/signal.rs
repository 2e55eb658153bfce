//! Inbound signal envelope
//!
//! A [`Signal`] is a command, query or event addressed to one entity. The
//! enforcement pipeline only looks at its category, target entity, resource
//! path and [`SignalHeaders`]; the payload travels through untouched except
//! for placeholder substitution.

use crate::enforcer::Permission;
use crate::ids::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Authorized subject id, e.g. `issuer:user-1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationSubject(String);

impl AuthorizationSubject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorizationSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subjects the caller was authenticated as, most specific first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    subjects: Vec<AuthorizationSubject>,
}

impl AuthorizationContext {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subjects: subjects.into_iter().map(AuthorizationSubject::new).collect(),
        }
    }

    /// Unauthenticated
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn subjects(&self) -> &[AuthorizationSubject] {
        &self.subjects
    }

    pub fn first_subject(&self) -> Option<&AuthorizationSubject> {
        self.subjects.first()
    }

    pub fn subject_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.subjects.iter().map(AuthorizationSubject::id)
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Whether a signal targets the persisted twin or the live device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Twin,
    Live,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Twin => "twin",
            Channel::Live => "live",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headers carried by every signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignalHeaders {
    pub correlation_id: String,
    #[serde(default)]
    pub auth_context: AuthorizationContext,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

impl SignalHeaders {
    /// Headers with a fresh random correlation id
    pub fn new(auth_context: AuthorizationContext) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            auth_context,
            channel: Channel::default(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

impl Default for SignalHeaders {
    fn default() -> Self {
        Self::new(AuthorizationContext::empty())
    }
}

/// Coarse classification of a signal, used for permission selection and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Query,
    Create,
    Modify,
    Merge,
    Delete,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Query => "query",
            SignalCategory::Create => "create",
            SignalCategory::Modify => "modify",
            SignalCategory::Merge => "merge",
            SignalCategory::Delete => "delete",
        }
    }

    pub fn required_permission(&self) -> Permission {
        match self {
            SignalCategory::Query => Permission::Read,
            _ => Permission::Write,
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound command, query or event against one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Signal type, e.g. `things.commands:modifyAttribute`
    pub name: String,
    pub category: SignalCategory,
    pub entity_id: EntityId,
    /// Path inside the entity the signal addresses; `/` for the whole entity
    pub resource_path: String,
    pub headers: SignalHeaders,
    pub payload: serde_json::Value,
}

impl Signal {
    pub fn new(name: impl Into<String>, category: SignalCategory, entity_id: EntityId) -> Self {
        Self {
            name: name.into(),
            category,
            entity_id,
            resource_path: "/".to_string(),
            headers: SignalHeaders::default(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_resource_path(mut self, path: impl Into<String>) -> Self {
        self.resource_path = path.into();
        self
    }

    pub fn with_headers(mut self, headers: SignalHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.headers.correlation_id
    }

    pub fn auth_context(&self) -> &AuthorizationContext {
        &self.headers.auth_context
    }
}
