//! The ask-with-retry primitive

use crate::config::AskWithRetryConfig;
use crate::error::AskError;
use crate::reply::{cast_reply, Reply};
use crate::retry::RetrySchedule;
use async_trait::async_trait;
use std::any::Any;
use tracing::{debug, warn};
use twinauth_core::{EnforcementError, Result};

/// Something that answers messages of type `M` with a [`Reply`]
#[async_trait]
pub trait AskTarget<M>: Send + Sync
where
    M: Send + 'static,
{
    /// One attempt. Must not retry internally.
    async fn ask(&self, message: M) -> std::result::Result<Reply, AskError>;

    /// Name used in logs and error messages
    fn name(&self) -> &str {
        "ask-target"
    }
}

/// What to do once retries are exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Fail the ask with this error
    Raise(EnforcementError),
    /// Give up silently; the ask resolves to `None`
    Drop,
}

/// Default timeout handler: raise [`EnforcementError::Timeout`] or
/// [`EnforcementError::Unavailable`] depending on the last failure.
pub fn raise_timeout(error: AskError) -> TimeoutOutcome {
    TimeoutOutcome::Raise(match error {
        AskError::Timeout(after) => {
            EnforcementError::timeout(format!("no reply within {}ms", after.as_millis()))
        }
        AskError::Unavailable(msg) | AskError::Closed(msg) => EnforcementError::Unavailable(msg),
    })
}

/// Ask `target`, retrying transient failures per `config`, and cast the reply to `R`.
///
/// Each attempt is bounded by `ask-timeout-ms` and the whole call, delays
/// included, by [`AskWithRetryConfig::overall_timeout`]. Structured error
/// replies are returned as errors without retrying. When retries are
/// exhausted or the overall deadline passes, `on_timeout` decides whether the
/// ask fails or resolves to `Ok(None)`.
pub async fn ask_with_retry<M, R, T, H>(
    target: &T,
    message: M,
    config: &AskWithRetryConfig,
    on_timeout: H,
) -> Result<Option<R>>
where
    T: AskTarget<M> + ?Sized,
    M: Clone + Send + 'static,
    R: Any,
    H: FnOnce(AskError) -> TimeoutOutcome,
{
    let overall = config.overall_timeout();
    let exhausted = match tokio::time::timeout(overall, retry_loop(target, message, config)).await
    {
        Ok(Ok(reply)) => return finish::<R>(reply?, target.name()).map(Some),
        Ok(Err(error)) => error,
        Err(_) => {
            warn!(
                ask_target = target.name(),
                overall_timeout_ms = overall.as_millis() as u64,
                "ask deadline elapsed"
            );
            AskError::Timeout(overall)
        }
    };
    match on_timeout(exhausted) {
        TimeoutOutcome::Raise(error) => Err(error),
        TimeoutOutcome::Drop => Ok(None),
    }
}

/// Attempts until a reply or a permanent failure (`Ok`), or until retries
/// are exhausted (`Err` with the last transient failure).
async fn retry_loop<M, T>(
    target: &T,
    message: M,
    config: &AskWithRetryConfig,
) -> std::result::Result<Result<Reply>, AskError>
where
    T: AskTarget<M> + ?Sized,
    M: Clone + Send + 'static,
{
    let timeout = config.ask_timeout();
    let mut schedule = RetrySchedule::new(config);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, target.ask(message.clone())).await {
            Ok(result) => result,
            Err(_) => Err(AskError::Timeout(timeout)),
        };

        let error = match result {
            Ok(reply) => return Ok(Ok(reply)),
            Err(error) => error,
        };

        if !error.is_transient() {
            warn!(ask_target = target.name(), attempt, error = %error, "ask failed permanently");
            return Ok(Err(EnforcementError::Unavailable(error.to_string())));
        }

        match schedule.next_delay() {
            Some(delay) => {
                debug!(
                    ask_target = target.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "ask failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            None => {
                warn!(ask_target = target.name(), attempts = attempt, error = %error, "ask retries exhausted");
                return Err(error);
            }
        }
    }
}

fn finish<R: Any>(reply: Reply, target: &str) -> Result<R> {
    let hint = format!(
        "expected {} from {target}",
        std::any::type_name::<R>()
    );
    cast_reply(reply, &hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` attempts by never answering, then replies.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AskTarget<String> for Flaky {
        async fn ask(&self, message: String) -> std::result::Result<Reply, AskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                std::future::pending::<()>().await;
            }
            Ok(Reply::response(format!("echo:{message}")))
        }
    }

    fn config(strategy: RetryStrategy, attempts: u32) -> AskWithRetryConfig {
        AskWithRetryConfig {
            ask_timeout_ms: 100,
            fixed_delay_ms: 10,
            backoff_min_ms: 10,
            backoff_max_ms: 40,
            ..Default::default()
        }
        .with_strategy(strategy, attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_reply() {
        let target = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let reply: Option<String> = ask_with_retry(
            &target,
            "hi".to_string(),
            &config(RetryStrategy::BackoffDelay, 3),
            raise_timeout,
        )
        .await
        .unwrap();
        assert_eq!(reply.as_deref(), Some("echo:hi"));
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_raise_timeout() {
        let target = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let start = tokio::time::Instant::now();
        let err = ask_with_retry::<_, String, _, _>(
            &target,
            "hi".to_string(),
            &config(RetryStrategy::FixedDelay, 2),
            raise_timeout,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EnforcementError::Timeout { .. }));
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
        // three timed-out attempts plus two fixed delays
        assert!(start.elapsed() >= Duration::from_millis(320));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_handler_can_drop() {
        let target = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let reply = ask_with_retry::<_, String, _, _>(
            &target,
            "hi".to_string(),
            &config(RetryStrategy::Off, 5),
            |_| TimeoutOutcome::Drop,
        )
        .await
        .unwrap();
        assert!(reply.is_none());
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    struct Refuses;

    #[async_trait]
    impl AskTarget<String> for Refuses {
        async fn ask(&self, _: String) -> std::result::Result<Reply, AskError> {
            Ok(Reply::error(EnforcementError::Unavailable("store".into())))
        }
    }

    #[tokio::test]
    async fn test_error_reply_is_not_retried() {
        let err = ask_with_retry::<_, String, _, _>(
            &Refuses,
            "hi".to_string(),
            &config(RetryStrategy::NoDelay, 3),
            raise_timeout,
        )
        .await
        .unwrap_err();
        assert_eq!(err, EnforcementError::Unavailable("store".into()));
    }

    #[tokio::test]
    async fn test_wrong_reply_type() {
        let target = Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
        };
        let err = ask_with_retry::<_, u64, _, _>(
            &target,
            "hi".to_string(),
            &config(RetryStrategy::NoDelay, 0),
            raise_timeout,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EnforcementError::UnexpectedResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_cuts_retries_short() {
        let target = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let config = AskWithRetryConfig {
            overall_timeout_ms: Some(250),
            ..config(RetryStrategy::NoDelay, 10)
        };
        let start = tokio::time::Instant::now();
        let mut handled = None;
        let err = ask_with_retry::<_, String, _, _>(&target, "hi".to_string(), &config, |e| {
            handled = Some(e.clone());
            raise_timeout(e)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EnforcementError::Timeout { .. }));
        assert_eq!(handled, Some(AskError::Timeout(Duration::from_millis(250))));
        // third attempt was running when the deadline passed
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_millis(300));
    }
}
