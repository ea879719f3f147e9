//! Retry policy for collaborator calls
//!
//! The loop controller never sees transient backend failures. Every call goes through
//! [`RetryingClient`], which applies capped exponential backoff and a per-call timeout,
//! and surfaces an error only once the attempt budget is spent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use crate::config::RetryConfig;

/// Exponential backoff with a capped attempt count
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Upper bound on a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        debug!(?config, "RetryPolicy::from_config: called");
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            backoff_coefficient: config.backoff_coefficient.max(1.0),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }

    /// Delay before the attempt that follows failed attempt number `attempt` (1-based)
    ///
    /// A server-provided retry-after wins over the computed backoff; both are clamped to
    /// `max_interval`.
    pub fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        if let Some(retry_after) = err.retry_after() {
            debug!(?retry_after, "delay_for: honoring retry-after");
            return retry_after.min(self.max_interval);
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// LlmClient decorator that owns retries for everything above it
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        debug!(?policy, "RetryingClient::new: called");
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(max_attempts = %self.policy.max_attempts, "RetryingClient::complete: called");
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.policy.call_timeout, self.inner.complete(request.clone())).await
            {
                Ok(result) => result,
                Err(_) => {
                    debug!(%attempt, "RetryingClient::complete: attempt timed out");
                    Err(LlmError::Timeout(self.policy.call_timeout))
                }
            };

            let err = match result {
                Ok(response) => {
                    debug!(%attempt, "RetryingClient::complete: success");
                    return Ok(response);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                debug!(%attempt, error = %err, "RetryingClient::complete: non-retryable error");
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                warn!(%attempt, error = %err, "Retries exhausted");
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt, &err);
            warn!(
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "complete: retrying after transient error"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            backoff_coefficient: 2.0,
            call_timeout: Duration::from_secs(5),
        }
    }

    fn unavailable() -> LlmError {
        LlmError::ApiError {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_default_policy_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(30));
        assert_eq!(policy.call_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            backoff_coefficient: 2.0,
            call_timeout: Duration::from_secs(300),
        };
        let err = unavailable();
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(4));
        assert_eq!(policy.delay_for(8, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_honors_retry_after_clamped() {
        let policy = RetryPolicy::default();
        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(30));

        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            Err(unavailable()),
            Err(unavailable()),
            Ok(CompletionResponse::from_text("finally")),
        ]));
        let client = RetryingClient::new(mock.clone(), fast_policy(3));

        let resp = client.complete(CompletionRequest::text("s", "u", 10)).await.unwrap();

        assert_eq!(resp.text(), "finally");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(CompletionResponse::from_text("too late")),
        ]));
        let client = RetryingClient::new(mock.clone(), fast_policy(3));

        let err = client.complete(CompletionRequest::text("s", "u", 10)).await.unwrap_err();

        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let mock = Arc::new(MockLlmClient::scripted(vec![Err(LlmError::ApiError {
            status: 401,
            message: "bad key".to_string(),
        })]));
        let client = RetryingClient::new(mock.clone(), fast_policy(3));

        let err = client.complete(CompletionRequest::text("s", "u", 10)).await.unwrap_err();

        assert!(matches!(err, LlmError::ApiError { status: 401, .. }));
        assert_eq!(mock.call_count(), 1);
    }
}
