//! Pre-enforcement
//!
//! Transformations applied to a signal before its enforcement task is built.
//! Each stage either returns the (possibly rewritten) signal or rejects it
//! with the error the caller will receive.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use twinauth_core::{BlockedNamespaces, EnforcementError, Result, Signal};

/// Header naming the subject a signal originated from
pub const ORIGINATOR_HEADER: &str = "originator";

/// One stage of the pre-enforcement chain
#[async_trait]
pub trait PreEnforcer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn apply(&self, signal: Signal) -> Result<Signal>;
}

/// Ordered list of stages; the first rejection wins
#[derive(Debug, Clone, Default)]
pub struct PreEnforcerChain {
    stages: Vec<Arc<dyn PreEnforcer>>,
}

impl PreEnforcerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocked-namespace check, originator header, placeholder substitution.
    pub fn standard(blocked: BlockedNamespaces) -> Self {
        Self::new()
            .with_stage(Arc::new(BlockedNamespacePreEnforcer::new(blocked)))
            .with_stage(Arc::new(OriginatorHeaderPreEnforcer))
            .with_stage(Arc::new(PlaceholderPreEnforcer))
    }

    pub fn with_stage(mut self, stage: Arc<dyn PreEnforcer>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn apply(&self, mut signal: Signal) -> Result<Signal> {
        for stage in &self.stages {
            signal = stage.apply(signal).await.inspect_err(|e| {
                debug!(stage = stage.name(), error = %e, "signal rejected before enforcement");
            })?;
        }
        Ok(signal)
    }
}

/// Rejects signals addressed to a blocked namespace
#[derive(Debug, Clone)]
pub struct BlockedNamespacePreEnforcer {
    blocked: BlockedNamespaces,
}

impl BlockedNamespacePreEnforcer {
    pub fn new(blocked: BlockedNamespaces) -> Self {
        Self { blocked }
    }
}

#[async_trait]
impl PreEnforcer for BlockedNamespacePreEnforcer {
    fn name(&self) -> &'static str {
        "blocked-namespace"
    }

    async fn apply(&self, signal: Signal) -> Result<Signal> {
        let namespace = signal.entity_id.namespace();
        if self.blocked.contains(namespace) {
            return Err(EnforcementError::NamespaceBlocked {
                namespace: namespace.to_string(),
            });
        }
        Ok(signal)
    }
}

/// Records the first authorized subject as the signal's originator
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginatorHeaderPreEnforcer;

#[async_trait]
impl PreEnforcer for OriginatorHeaderPreEnforcer {
    fn name(&self) -> &'static str {
        "originator-header"
    }

    async fn apply(&self, mut signal: Signal) -> Result<Signal> {
        if signal.headers.get(ORIGINATOR_HEADER).is_none() {
            if let Some(subject) = signal.auth_context().first_subject() {
                let subject = subject.id().to_string();
                signal.headers.extra.insert(ORIGINATOR_HEADER.to_string(), subject);
            }
        }
        Ok(signal)
    }
}

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*request:([A-Za-z]+)\s*\}\}").ok());

/// Substitutes `{{ request:subjectId }}` in payload strings
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderPreEnforcer;

impl PlaceholderPreEnforcer {
    fn substitute(value: &mut serde_json::Value, pattern: &Regex, subject: Option<&str>) -> Result<()> {
        match value {
            serde_json::Value::String(s) if pattern.is_match(s.as_str()) => {
                let mut failure = None;
                let replaced = pattern.replace_all(s.as_str(), |caps: &regex::Captures<'_>| {
                    match (&caps[1], subject) {
                        ("subjectId", Some(subject)) => subject.to_string(),
                        ("subjectId", None) => {
                            failure.get_or_insert_with(|| {
                                "placeholder 'request:subjectId' used without an authorized subject"
                                    .to_string()
                            });
                            String::new()
                        }
                        (other, _) => {
                            failure.get_or_insert_with(|| {
                                format!("unknown placeholder 'request:{other}'")
                            });
                            String::new()
                        }
                    }
                }).into_owned();
                if let Some(failure) = failure {
                    return Err(EnforcementError::InvalidPayload(failure));
                }
                *s = replaced;
                Ok(())
            }
            serde_json::Value::Array(items) => items
                .iter_mut()
                .try_for_each(|item| Self::substitute(item, pattern, subject)),
            serde_json::Value::Object(map) => map
                .values_mut()
                .try_for_each(|item| Self::substitute(item, pattern, subject)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PreEnforcer for PlaceholderPreEnforcer {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn apply(&self, mut signal: Signal) -> Result<Signal> {
        let Some(pattern) = PLACEHOLDER.as_ref() else {
            return Err(EnforcementError::internal("placeholder pattern failed to compile"));
        };
        let subject = signal
            .headers
            .auth_context
            .first_subject()
            .map(|s| s.id().to_string());
        Self::substitute(&mut signal.payload, pattern, subject.as_deref())?;
        Ok(signal)
    }
}
