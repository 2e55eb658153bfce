//! Typed, namespaced entity identifiers
//!
//! Entities are addressed as `namespace:name`. The namespace may be empty
//! (`:name`), the name may not. An [`EntityId`] additionally carries the
//! [`EntityType`] so that identically named things and policies never collide
//! in the scheduler map or in a cache partition.

use crate::error::{EnforcementError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of entity governed by authorization (thing, policy, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(Arc<str>);

impl EntityType {
    pub const THING: &'static str = "thing";
    pub const POLICY: &'static str = "policy";

    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn thing() -> Self {
        Self::new(Self::THING)
    }

    pub fn policy() -> Self {
        Self::new(Self::POLICY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_policy(&self) -> bool {
        &*self.0 == Self::POLICY
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split `namespace:name` at the first colon.
fn split_namespaced(id: &str) -> Result<(Arc<str>, Arc<str>)> {
    let Some((namespace, name)) = id.split_once(':') else {
        return Err(EnforcementError::InvalidId(format!(
            "'{id}' is not of the form 'namespace:name'"
        )));
    };
    if name.is_empty() {
        return Err(EnforcementError::InvalidId(format!(
            "'{id}' has an empty name"
        )));
    }
    if namespace.chars().any(char::is_whitespace) {
        return Err(EnforcementError::InvalidId(format!(
            "'{id}' has whitespace in its namespace"
        )));
    }
    Ok((Arc::from(namespace), Arc::from(name)))
}

/// Identifier of an entity governed by authorization
///
/// Cheap to clone (all parts are `Arc<str>`); used as the per-entity key of
/// the enforcement scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    entity_type: EntityType,
    namespace: Arc<str>,
    name: Arc<str>,
}

impl EntityId {
    /// Parse a `namespace:name` id for the given entity type.
    pub fn new(entity_type: EntityType, id: &str) -> Result<Self> {
        let (namespace, name) = split_namespaced(id)?;
        Ok(Self {
            entity_type,
            namespace,
            name,
        })
    }

    pub fn thing(id: &str) -> Result<Self> {
        Self::new(EntityType::thing(), id)
    }

    pub fn policy(id: &str) -> Result<Self> {
        Self::new(EntityType::policy(), id)
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Identifier of a policy
///
/// Serialized as its `namespace:name` string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyId {
    namespace: Arc<str>,
    name: Arc<str>,
}

impl PolicyId {
    pub fn parse(id: &str) -> Result<Self> {
        let (namespace, name) = split_namespaced(id)?;
        Ok(Self { namespace, name })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy as a schedulable entity
    pub fn to_entity_id(&self) -> EntityId {
        EntityId {
            entity_type: EntityType::policy(),
            namespace: Arc::clone(&self.namespace),
            name: Arc::clone(&self.name),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl TryFrom<String> for PolicyId {
    type Error = EnforcementError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PolicyId> for String {
    fn from(id: PolicyId) -> Self {
        id.to_string()
    }
}

impl TryFrom<&EntityId> for PolicyId {
    type Error = EnforcementError;

    fn try_from(id: &EntityId) -> Result<Self> {
        if !id.entity_type().is_policy() {
            return Err(EnforcementError::InvalidId(format!(
                "{} '{}' is not a policy",
                id.entity_type(),
                id
            )));
        }
        Ok(Self {
            namespace: Arc::clone(&id.namespace),
            name: Arc::clone(&id.name),
        })
    }
}
