//! Enforcement tasks

use crate::contextual::{ContextualResult, OutboundMessage, ResponseReceiver};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use twinauth_core::{EnforcementError, EntityId, Result, SignalHeaders};

type StartFn = Box<dyn FnOnce() -> BoxFuture<'static, ContextualResult> + Send>;

/// Where to report a task whose body panicked
#[derive(Clone)]
pub(crate) struct Fallback {
    pub(crate) headers: SignalHeaders,
    pub(crate) receiver: Arc<dyn ResponseReceiver>,
}

/// Unit of scheduled work bound to one entity
///
/// Created once per inbound signal and consumed by the scheduler. `start` is
/// not invoked until the entity's start barrier has cleared.
pub struct EnforcementTask {
    entity_id: EntityId,
    changes_authorization: bool,
    start: StartFn,
    fallback: Option<Fallback>,
}

impl fmt::Debug for EnforcementTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnforcementTask")
            .field("entity_id", &self.entity_id)
            .field("changes_authorization", &self.changes_authorization)
            .finish_non_exhaustive()
    }
}

impl EnforcementTask {
    pub fn new<F, Fut>(entity_id: EntityId, changes_authorization: bool, start: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ContextualResult> + Send + 'static,
    {
        Self {
            entity_id,
            changes_authorization,
            start: Box::new(move || start().boxed()),
            fallback: None,
        }
    }

    /// Task whose body may fail; an error is turned into an error result for
    /// `receiver` so the task still completes normally.
    pub fn from_fallible<F, Fut>(
        entity_id: EntityId,
        changes_authorization: bool,
        headers: SignalHeaders,
        receiver: Arc<dyn ResponseReceiver>,
        start: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ContextualResult>> + Send + 'static,
    {
        let fallback = Fallback {
            headers: headers.clone(),
            receiver: Arc::clone(&receiver),
        };
        let error_entity = entity_id.clone();
        let mut task = Self::new(entity_id, changes_authorization, move || async move {
            match start().await {
                Ok(result) => result,
                Err(error) => ContextualResult::error(error_entity, headers, error, receiver),
            }
        });
        task.fallback = Some(fallback);
        task
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn changes_authorization(&self) -> bool {
        self.changes_authorization
    }

    pub(crate) fn into_parts(self) -> (EntityId, bool, StartFn, Option<Fallback>) {
        (
            self.entity_id,
            self.changes_authorization,
            self.start,
            self.fallback,
        )
    }
}

impl Fallback {
    /// Report an internal failure for the task this fallback belongs to.
    pub(crate) fn report(&self, entity_id: &EntityId, message: String) {
        let error = EnforcementError::Internal {
            correlation_id: Some(self.headers.correlation_id.clone()),
            message: "An unexpected error occurred during enforcement".to_string(),
            cause: Some(message),
        };
        self.receiver
            .tell(entity_id, &self.headers, OutboundMessage::Error(error));
    }
}
