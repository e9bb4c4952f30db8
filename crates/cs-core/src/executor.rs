//! Rate-limit aware execution of remote calls.
//!
//! Every call against the target platform goes through [`Executor::execute`].
//! Calls are awaited one at a time, retried with multiplicative backoff on
//! throttling and transient failures, and followed by a fixed pause so the
//! aggregate request rate stays predictable.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::client::WriteError;

/// Retry and pacing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    /// Added on top of a platform-provided `retry_after` hint.
    pub rate_limit_buffer: Duration,
    /// Pause after every completed call.
    pub write_spacing: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            rate_limit_buffer: Duration::from_millis(500),
            write_spacing: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Computed backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Wait before retry number `retry`, honouring a throttling hint.
    ///
    /// The hinted wait is capped at `max_backoff` like the computed one.
    pub fn wait_for(&self, retry: u32, error: &WriteError) -> Duration {
        let computed = self.backoff(retry);
        match error {
            WriteError::RateLimited {
                retry_after: Some(hint),
            } => {
                let hinted = hint
                    .saturating_add(self.rate_limit_buffer)
                    .min(self.max_backoff);
                computed.max(hinted)
            }
            _ => computed,
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// A call that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: WriteError,
    },
    #[error("{operation} failed: {source}")]
    Fatal {
        operation: String,
        #[source]
        source: WriteError,
    },
}

impl ExecError {
    pub const fn write_error(&self) -> &WriteError {
        match self {
            Self::RetriesExhausted { last, .. } => last,
            Self::Fatal { source, .. } => source,
        }
    }

    /// Whether the credentials were rejected.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self.write_error(), WriteError::Unauthorized(_))
    }
}

/// Sequential executor applying a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Executor {
    policy: RetryPolicy,
}

impl Executor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `call` until it succeeds, fails fatally, or runs out of retries.
    ///
    /// `operation` names the call in logs and errors.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WriteError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;
        let result = loop {
            match call().await {
                Ok(value) => break Ok(value),
                Err(err) if err.is_retriable() && attempt < max_attempts => {
                    let wait = self.policy.wait_for(attempt, &err);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        cause = err.cause(),
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) if err.is_retriable() => {
                    break Err(ExecError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    break Err(ExecError::Fatal {
                        operation: operation.to_string(),
                        source: err,
                    });
                }
            }
        };

        if !self.policy.write_spacing.is_zero() {
            tokio::time::sleep(self.policy.write_spacing).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            write_spacing: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    /// Replays scripted results, counting calls.
    async fn run_script(
        executor: &Executor,
        script: Vec<Result<u32, WriteError>>,
    ) -> (Result<u32, ExecError>, usize) {
        let mut script: VecDeque<_> = script.into();
        let mut calls = 0;
        let result = executor
            .execute("test_call", || {
                calls += 1;
                let next = script
                    .pop_front()
                    .unwrap_or(Err(WriteError::RateLimited { retry_after: None }));
                async move { next }
            })
            .await;
        (result, calls)
    }

    #[test]
    fn backoff_grows_multiplicatively_and_caps() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn throttling_hint_wins_when_longer() {
        let policy = RetryPolicy::default();
        let hinted = WriteError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(policy.wait_for(1, &hinted), Duration::from_millis(5500));

        let short = WriteError::RateLimited {
            retry_after: Some(Duration::from_millis(10)),
        };
        assert_eq!(policy.wait_for(3, &short), Duration::from_secs(4));
    }

    #[test]
    fn throttling_hint_is_capped_at_max_backoff() {
        let policy = RetryPolicy::default();
        let bogus = WriteError::RateLimited {
            retry_after: Some(Duration::from_secs(86_400)),
        };
        assert_eq!(policy.wait_for(1, &bogus), policy.max_backoff);

        let overflowing = WriteError::RateLimited {
            retry_after: Some(Duration::MAX),
        };
        assert_eq!(policy.wait_for(1, &overflowing), policy.max_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn success_needs_one_call() {
        let executor = Executor::new(policy());
        let (result, calls) = run_script(&executor, vec![Ok(7)]).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let executor = Executor::new(policy());
        let started = Instant::now();
        let (result, calls) = run_script(
            &executor,
            vec![Err(WriteError::Transient("connection reset".to_string())), Ok(1)],
        )
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls, 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limiting_exhausts_retries() {
        let executor = Executor::new(policy());
        let (result, calls) = run_script(&executor, Vec::new()).await;
        assert_eq!(calls, 4);
        match result {
            Err(ExecError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, WriteError::RateLimited { retry_after: None });
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let executor = Executor::new(policy());
        let (result, calls) = run_script(
            &executor,
            vec![Err(WriteError::Fatal {
                status: 400,
                message: "invalid form body".to_string(),
            })],
        )
        .await;
        assert_eq!(calls, 1);
        let err = result.unwrap_err();
        assert!(matches!(err, ExecError::Fatal { .. }));
        assert!(!err.is_unauthorized());
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_surfaced_immediately() {
        let executor = Executor::new(policy());
        let (result, calls) = run_script(
            &executor,
            vec![Err(WriteError::Unauthorized("401".to_string()))],
        )
        .await;
        assert_eq!(calls, 1);
        assert!(result.unwrap_err().is_unauthorized());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_is_honoured() {
        let executor = Executor::new(policy());
        let started = Instant::now();
        let (result, _) = run_script(
            &executor,
            vec![
                Err(WriteError::RateLimited {
                    retry_after: Some(Duration::from_secs(5)),
                }),
                Ok(2),
            ],
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert!(started.elapsed() >= Duration::from_millis(5500));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_follows_every_call() {
        let executor = Executor::new(RetryPolicy {
            write_spacing: Duration::from_secs(2),
            ..RetryPolicy::default()
        });
        let started = Instant::now();
        let (result, _) = run_script(&executor, vec![Ok(3)]).await;
        assert_eq!(result.unwrap(), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
