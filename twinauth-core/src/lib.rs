//! Core types for twin authorization enforcement
//!
//! This crate holds the leaf data model shared by the ask, policy-cache and
//! enforcement crates:
//!
//! - [`EntityId`] / [`PolicyId`]: typed, namespaced identifiers (the scheduling and cache key)
//! - [`Entry`]: cache value that distinguishes "confirmed absent" from "not yet looked up"
//! - [`Policy`] and [`PolicyEnforcer`]: a policy snapshot paired with its compiled [`Enforcer`]
//! - [`Signal`] / [`SignalHeaders`]: the inbound command/event envelope
//! - [`BlockedNamespaces`]: shared set of namespaces currently blocked
//! - [`EnforcementError`]: the structured error delivered to callers
//!
//! How an [`Enforcer`] evaluates subjects, permissions and resource paths is
//! deliberately not defined here; implementations plug in via [`EnforcerFactory`].

mod enforcer;
mod entry;
mod error;
mod ids;
mod namespaces;
mod policy;
mod signal;

pub use enforcer::{Enforcer, EnforcerFactory, Permission, PolicyEnforcer, ResourceKey};
pub use entry::Entry;
pub use error::{EnforcementError, Result};
pub use ids::{EntityId, EntityType, PolicyId};
pub use namespaces::BlockedNamespaces;
pub use policy::{Policy, PolicyImport};
pub use signal::{
    AuthorizationContext, AuthorizationSubject, Channel, Signal, SignalCategory, SignalHeaders,
};
