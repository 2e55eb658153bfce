//! Enforcer capability and the policy/enforcer pairing
//!
//! The [`Enforcer`] trait is the seam to the permission-evaluation algorithm.
//! Everything in this workspace treats it as opaque: it is compiled once per
//! policy by an [`EnforcerFactory`], cached as part of a [`PolicyEnforcer`],
//! and queried by enforcement providers.

use crate::error::Result;
use crate::policy::Policy;
use crate::signal::AuthorizationContext;
use std::fmt;
use std::sync::Arc;

/// Permission requested on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "READ",
            Permission::Write => "WRITE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource addressed by an enforcement check: `type:/path`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resource_type: String,
    pub path: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            resource_type: resource_type.into(),
            path,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.path)
    }
}

/// Compiled authorization-decision structure
pub trait Enforcer: Send + Sync + fmt::Debug {
    /// Whether the context holds all `permissions` on `resource` and everything below it.
    fn has_unrestricted_permissions(
        &self,
        resource: &ResourceKey,
        context: &AuthorizationContext,
        permissions: &[Permission],
    ) -> bool;
}

/// Compiles a [`Policy`] into an [`Enforcer`]
pub trait EnforcerFactory: Send + Sync + fmt::Debug {
    fn compile(&self, policy: &Policy) -> Result<Arc<dyn Enforcer>>;
}

/// A policy snapshot paired with its compiled enforcer
///
/// The enforcer is always present. The policy is optional: [`project`](Self::project)
/// drops it once only the decision structure is needed, and
/// [`embed`](Self::embed) wraps an enforcer that never had a policy.
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    policy: Option<Arc<Policy>>,
    enforcer: Arc<dyn Enforcer>,
}

impl PolicyEnforcer {
    pub fn new(policy: Arc<Policy>, enforcer: Arc<dyn Enforcer>) -> Self {
        Self {
            policy: Some(policy),
            enforcer,
        }
    }

    /// Compile `policy` with `factory` and pair the two.
    pub fn of(policy: Policy, factory: &dyn EnforcerFactory) -> Result<Self> {
        let enforcer = factory.compile(&policy)?;
        Ok(Self::new(Arc::new(policy), enforcer))
    }

    pub fn embed(enforcer: Arc<dyn Enforcer>) -> Self {
        Self {
            policy: None,
            enforcer,
        }
    }

    /// Same enforcer, policy dropped
    pub fn project(&self) -> Self {
        Self::embed(Arc::clone(&self.enforcer))
    }

    pub fn policy(&self) -> Option<&Arc<Policy>> {
        self.policy.as_ref()
    }

    pub fn enforcer(&self) -> &Arc<dyn Enforcer> {
        &self.enforcer
    }
}
