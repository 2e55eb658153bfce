//! Results of enforcement tasks and where they go
//!
//! A [`ContextualResult`] is what a task body produces: the outbound message
//! (or a deferred ask that will produce it), the receiver to send it to, and
//! the headers used for correlation and logging. It is rebuilt by value at
//! each stage rather than mutated in place.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use twinauth_core::{EnforcementError, EntityId, Result, Signal, SignalHeaders};

/// Message dispatched at the end of an enforcement task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Enforced signal, passed on unchanged or transformed
    Signal(Signal),
    /// Domain response for the original caller
    Response(serde_json::Value),
    /// Structured error for the original caller
    Error(EnforcementError),
}

impl OutboundMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, OutboundMessage::Error(_))
    }
}

/// Destination of dispatched messages
pub trait ResponseReceiver: Send + Sync {
    /// Deliver without waiting; delivery failures are the receiver's concern.
    fn tell(&self, entity_id: &EntityId, headers: &SignalHeaders, message: OutboundMessage);
}

/// What a [`ChannelReceiver`] forwards
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub entity_id: EntityId,
    pub correlation_id: String,
    pub message: OutboundMessage,
}

/// Receiver forwarding every message into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelReceiver {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelReceiver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResponseReceiver for ChannelReceiver {
    fn tell(&self, entity_id: &EntityId, headers: &SignalHeaders, message: OutboundMessage) {
        let delivery = Delivery {
            entity_id: entity_id.clone(),
            correlation_id: headers.correlation_id.clone(),
            message,
        };
        if self.tx.send(delivery).is_err() {
            debug!(correlation_id = %headers.correlation_id, "receiver gone, message discarded");
        }
    }
}

/// Deferred ask producing the outbound message; `Ok(None)` drops it silently
pub type AskFuture = BoxFuture<'static, Result<Option<OutboundMessage>>>;

/// Outcome of a task body, dispatched by the scheduler in entity order
pub struct ContextualResult {
    entity_id: EntityId,
    headers: SignalHeaders,
    message: Option<OutboundMessage>,
    ask_future: Option<AskFuture>,
    receiver: Option<Arc<dyn ResponseReceiver>>,
}

impl fmt::Debug for ContextualResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextualResult")
            .field("entity_id", &self.entity_id)
            .field("correlation_id", &self.headers.correlation_id)
            .field("message", &self.message)
            .field("has_ask_future", &self.ask_future.is_some())
            .field("has_receiver", &self.receiver.is_some())
            .finish()
    }
}

impl ContextualResult {
    /// Result with nothing to send yet
    pub fn new(entity_id: EntityId, headers: SignalHeaders) -> Self {
        Self {
            entity_id,
            headers,
            message: None,
            ask_future: None,
            receiver: None,
        }
    }

    /// Error result addressed to `receiver`
    pub fn error(
        entity_id: EntityId,
        headers: SignalHeaders,
        error: EnforcementError,
        receiver: Arc<dyn ResponseReceiver>,
    ) -> Self {
        let error = error.with_correlation_id(&headers.correlation_id);
        Self::new(entity_id, headers)
            .with_message(OutboundMessage::Error(error))
            .with_receiver(receiver)
    }

    pub fn with_message(self, message: OutboundMessage) -> Self {
        Self {
            message: Some(message),
            ask_future: None,
            ..self
        }
    }

    /// Replace the direct message with a deferred ask.
    pub fn with_ask_future(self, ask_future: AskFuture) -> Self {
        Self {
            message: None,
            ask_future: Some(ask_future),
            ..self
        }
    }

    pub fn with_receiver(self, receiver: Arc<dyn ResponseReceiver>) -> Self {
        Self {
            receiver: Some(receiver),
            ..self
        }
    }

    pub fn with_headers(self, headers: SignalHeaders) -> Self {
        Self { headers, ..self }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn headers(&self) -> &SignalHeaders {
        &self.headers
    }

    pub fn message(&self) -> Option<&OutboundMessage> {
        self.message.as_ref()
    }

    pub fn has_ask_future(&self) -> bool {
        self.ask_future.is_some()
    }

    /// Resolve the deferred ask, if any, and send the message to the receiver.
    pub(crate) async fn dispatch(self) {
        let Self {
            entity_id,
            headers,
            message,
            ask_future,
            receiver,
        } = self;

        let message = match ask_future {
            Some(ask) => match ask.await {
                Ok(message) => message,
                Err(error) => Some(OutboundMessage::Error(
                    error.with_correlation_id(&headers.correlation_id),
                )),
            },
            None => message,
        };

        match (message, receiver) {
            (Some(message), Some(receiver)) => receiver.tell(&entity_id, &headers, message),
            (Some(message), None) => {
                warn!(
                    entity_id = %entity_id,
                    correlation_id = %headers.correlation_id,
                    is_error = message.is_error(),
                    "no receiver for enforcement result, discarding"
                );
            }
            (None, _) => {
                debug!(
                    entity_id = %entity_id,
                    correlation_id = %headers.correlation_id,
                    "enforcement result dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn lamp() -> EntityId {
        EntityId::thing("ns:lamp").unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_direct_message() {
        let (receiver, mut rx) = ChannelReceiver::new();
        let headers = SignalHeaders::default().with_correlation_id("c-1");
        ContextualResult::new(lamp(), headers)
            .with_message(OutboundMessage::Response(serde_json::json!({"ok": true})))
            .with_receiver(Arc::new(receiver))
            .dispatch()
            .await;

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.correlation_id, "c-1");
        assert_eq!(
            delivery.message,
            OutboundMessage::Response(serde_json::json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn test_ask_future_error_becomes_error_message() {
        let (receiver, mut rx) = ChannelReceiver::new();
        let headers = SignalHeaders::default().with_correlation_id("c-2");
        let ask: AskFuture = async { Err(EnforcementError::internal("store crashed")) }.boxed();
        ContextualResult::new(lamp(), headers)
            .with_ask_future(ask)
            .with_receiver(Arc::new(receiver))
            .dispatch()
            .await;

        match rx.recv().await.unwrap().message {
            OutboundMessage::Error(EnforcementError::Internal { correlation_id, .. }) => {
                assert_eq!(correlation_id.as_deref(), Some("c-2"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_ask_sends_nothing() {
        let (receiver, mut rx) = ChannelReceiver::new();
        let ask: AskFuture = async { Ok(None) }.boxed();
        ContextualResult::new(lamp(), SignalHeaders::default())
            .with_ask_future(ask)
            .with_receiver(Arc::new(receiver))
            .dispatch()
            .await;
        assert!(rx.try_recv().is_err());
    }
}
