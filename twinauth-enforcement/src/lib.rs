//! Ordered enforcement of signals
//!
//! Turns inbound signals into enforcement tasks and runs them so that, per
//! entity, authorization-changing work acts as a full barrier while other
//! work only keeps its dispatch order.
//!
//! ## Components
//!
//! - [`EnforcementScheduler`]: per-entity start and completion barriers
//! - [`EnforcementTask`] / [`ContextualResult`]: a unit of work and its outcome
//! - [`PolicyEnforcementProvider`]: builds tasks that check the governing policy
//!   enforcer and forward permitted signals
//! - [`CreationRestrictionEnforcer`]: grant/revoke rules for entity creation
//! - [`PreEnforcerChain`]: namespace blocking, header enrichment and
//!   placeholder substitution before scheduling
//! - [`EnforcementService`]: composition root built from [`EnforcementConfig`]
//!
//! ## Usage
//!
//! ```ignore
//! let config = EnforcementConfig::load(Path::new("enforcement.toml"))?;
//! let service = EnforcementService::new(&config, deps)?;
//! let (receiver, mut responses) = ChannelReceiver::new();
//! service.handle(signal, Arc::new(receiver)).await?;
//! let delivery = responses.recv().await;
//! service.shutdown().await;
//! ```

mod config;
mod contextual;
mod creation;
mod pre_enforcement;
mod provider;
mod scheduler;
mod service;
mod task;
pub mod telemetry;

pub use config::{ConfigFileError, EnforcementConfig};
pub use contextual::{
    AskFuture, ChannelReceiver, ContextualResult, Delivery, OutboundMessage, ResponseReceiver,
};
pub use creation::{
    CreationContext, CreationRestrictionConfig, CreationRestrictionEnforcer, CreationRuleConfig,
};
pub use pre_enforcement::{
    BlockedNamespacePreEnforcer, OriginatorHeaderPreEnforcer, PlaceholderPreEnforcer,
    PreEnforcer, PreEnforcerChain, ORIGINATOR_HEADER,
};
pub use provider::{EnforcementProvider, PolicyEnforcementProvider, RESPONSE_REQUIRED_HEADER};
pub use scheduler::{EnforcementScheduler, SchedulerStats};
pub use service::{EnforcementDeps, EnforcementService};
pub use task::EnforcementTask;
