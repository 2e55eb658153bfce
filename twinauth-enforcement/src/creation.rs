//! Creation restrictions
//!
//! Config-driven allow/deny check for entity creation. A request may create
//! an entity when some grant rule matches it and no revoke rule does. An empty
//! grant list grants everything, so with both lists empty every creation is
//! allowed.
//!
//! Namespace and subject patterns are regular expressions that must match the
//! whole value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;
use twinauth_core::{AuthorizationContext, EnforcementError, Result};

/// One grant or revoke rule as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CreationRuleConfig {
    /// Resource types the rule applies to; empty means all
    pub resource_types: BTreeSet<String>,
    /// Namespace patterns; empty means all
    pub namespaces: Vec<String>,
    /// Authorized-subject patterns; empty means all
    pub auth_subjects: Vec<String>,
}

/// `[creation-restriction]` configuration section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CreationRestrictionConfig {
    pub grant: Vec<CreationRuleConfig>,
    pub revoke: Vec<CreationRuleConfig>,
}

/// What a creation request looks like to the rules
#[derive(Debug, Clone, Copy)]
pub struct CreationContext<'a> {
    pub resource_type: &'a str,
    pub namespace: &'a str,
    pub auth_context: &'a AuthorizationContext,
}

#[derive(Debug)]
struct CreationRule {
    resource_types: BTreeSet<String>,
    namespaces: Vec<Regex>,
    auth_subjects: Vec<Regex>,
}

impl CreationRule {
    fn compile(config: &CreationRuleConfig) -> Result<Self> {
        Ok(Self {
            resource_types: config.resource_types.clone(),
            namespaces: compile_patterns(&config.namespaces)?,
            auth_subjects: compile_patterns(&config.auth_subjects)?,
        })
    }

    fn matches(&self, context: &CreationContext<'_>) -> bool {
        let type_matches = self.resource_types.is_empty()
            || self.resource_types.contains(context.resource_type);
        let subject_matches = self.auth_subjects.is_empty()
            || context
                .auth_context
                .subject_ids()
                .any(|subject| self.auth_subjects.iter().any(|p| p.is_match(subject)));
        let namespace_matches = self.namespaces.is_empty()
            || self.namespaces.iter().any(|p| p.is_match(context.namespace));
        type_matches && subject_matches && namespace_matches
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                EnforcementError::config(format!("invalid creation restriction pattern '{pattern}': {e}"))
            })
        })
        .collect()
}

/// Compiled grant and revoke rules
#[derive(Debug)]
pub struct CreationRestrictionEnforcer {
    grant: Vec<CreationRule>,
    revoke: Vec<CreationRule>,
}

impl CreationRestrictionEnforcer {
    /// Compile the configured rules; a malformed pattern is a configuration error.
    pub fn new(config: &CreationRestrictionConfig) -> Result<Self> {
        Ok(Self {
            grant: config.grant.iter().map(CreationRule::compile).collect::<Result<_>>()?,
            revoke: config.revoke.iter().map(CreationRule::compile).collect::<Result<_>>()?,
        })
    }

    /// Enforcer allowing every creation
    pub fn allow_all() -> Self {
        Self {
            grant: Vec::new(),
            revoke: Vec::new(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }

    pub fn can_create(&self, context: &CreationContext<'_>) -> bool {
        let granted = self.grant.is_empty() || self.grant.iter().any(|r| r.matches(context));
        let revoked = self.revoke.iter().any(|r| r.matches(context));
        let allowed = granted && !revoked;
        debug!(
            resource_type = context.resource_type,
            namespace = context.namespace,
            granted,
            revoked,
            "creation restriction evaluated"
        );
        allowed
    }
}

impl Default for CreationRestrictionEnforcer {
    fn default() -> Self {
        Self::allow_all()
    }
}
