//! Ask-with-retry
//!
//! Timed request/response against a remote target (a store, shard proxy or
//! any other [`AskTarget`]), with bounded retries on transient failures and a
//! typed cast of the reply.
//!
//! Outcomes of [`ask_with_retry`]:
//! - the reply casts to the expected type: `Ok(Some(value))`
//! - the reply is a structured error carrier: its embedded [`EnforcementError`]
//! - the reply has another type: [`EnforcementError::UnexpectedResponse`]
//! - retries are exhausted: the caller's timeout handler decides between
//!   raising an error and dropping silently (`Ok(None)`)
//!
//! [`EnforcementError`]: twinauth_core::EnforcementError
//! [`EnforcementError::UnexpectedResponse`]: twinauth_core::EnforcementError::UnexpectedResponse

mod ask;
mod config;
mod error;
mod mailbox;
mod reply;
mod retry;

pub use ask::{ask_with_retry, raise_timeout, AskTarget, TimeoutOutcome};
pub use config::{AskWithRetryConfig, RetryStrategy};
pub use error::AskError;
pub use mailbox::{Envelope, Mailbox, MailboxTarget};
pub use reply::{cast_reply, Reply};
pub use retry::{Backoff, RetrySchedule};
