//! Channel-backed ask target
//!
//! A [`MailboxTarget`] sends each message together with a oneshot reply slot
//! into an mpsc channel; whatever task owns the receiving [`Mailbox`] answers
//! through the slot. Stores, shard proxies and test doubles can all sit behind
//! one.

use crate::ask::AskTarget;
use crate::error::AskError;
use crate::reply::Reply;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Message plus the slot its reply goes into
pub type Envelope<M> = (M, oneshot::Sender<Reply>);

/// Receiving side of a [`MailboxTarget`]
pub type Mailbox<M> = mpsc::Receiver<Envelope<M>>;

/// Sending side: an [`AskTarget`] backed by a bounded channel
#[derive(Debug)]
pub struct MailboxTarget<M> {
    name: String,
    tx: mpsc::Sender<Envelope<M>>,
}

impl<M> Clone for MailboxTarget<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> MailboxTarget<M> {
    /// Create a target and the mailbox that serves it.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, Mailbox<M>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl<M> AskTarget<M> for MailboxTarget<M>
where
    M: Send + 'static,
{
    async fn ask(&self, message: M) -> Result<Reply, AskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((message, reply_tx))
            .await
            .map_err(|_| AskError::Closed(self.name.clone()))?;
        // The server dropped the reply slot without answering.
        reply_rx
            .await
            .map_err(|_| AskError::Unavailable(format!("{} dropped the request", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
