use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DependencyConfig;
use crate::error::{ErrorKind, ExternalError};
use crate::pipeline::rate_limiter::RateLimiter;

/// Bounded exponential backoff parameters for one dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
    pub call_timeout: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &DependencyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter_ratio: config.jitter_ratio,
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay before retry number `retry` (1 is the first retry).
    ///
    /// `jitter_sample` is a value in [0, 1). The result never drops below `previous` and
    /// never exceeds `max_delay`.
    pub fn delay_for(&self, retry: u32, previous: Duration, jitter_sample: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let jitter = 1.0 + self.jitter_ratio * jitter_sample.clamp(0.0, 1.0);
        let capped_ms = (exponential_ms * jitter).min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
            .max(previous)
            .min(self.max_delay)
    }
}

/// A call abandoned by the controller, with the number of attempts made.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub error_kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
}

impl CallFailure {
    fn new(error: &ExternalError, attempts: u32) -> Self {
        Self { error_kind: error.kind(), attempts, message: error.to_string() }
    }
}

/// Wraps calls to one dependency with throttling, per-call timeouts and retries.
#[derive(Debug, Clone)]
pub struct BackoffController {
    limiter: RateLimiter,
    policy: BackoffPolicy,
    cancel: CancellationToken,
}

impl BackoffController {
    pub fn new(limiter: RateLimiter, policy: BackoffPolicy, cancel: CancellationToken) -> Self {
        Self { limiter, policy, cancel }
    }

    pub fn from_config(dependency: &str, config: &DependencyConfig, cancel: CancellationToken) -> Self {
        Self::new(
            RateLimiter::new(dependency, config.min_interval()),
            BackoffPolicy::from_config(config),
            cancel,
        )
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Every attempt passes through the rate limiter first. Retry waits abort as soon as the
    /// cancellation token fires; an attempt already in flight runs to completion or timeout.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        self.execute_counted(operation).await.0
    }

    /// Like [`execute`](Self::execute), also reporting how many attempts were made.
    pub async fn execute_counted<T, F, Fut>(&self, mut operation: F) -> (Result<T, CallFailure>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let dependency = self.limiter.dependency().to_string();
        let mut attempts = 0u32;
        let mut previous_delay = Duration::ZERO;

        loop {
            self.limiter.acquire().await;
            attempts += 1;

            let result = match tokio::time::timeout(self.policy.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ExternalError::transient(
                    ErrorKind::Timeout,
                    format!("call exceeded {:?}", self.policy.call_timeout),
                )),
            };

            let error = match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(dependency = %dependency, attempt = attempts, "call succeeded after retry");
                    }
                    return (Ok(value), attempts);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                debug!(
                    dependency = %dependency,
                    attempt = attempts,
                    error_kind = %error.kind(),
                    "non-retryable failure: {}", error
                );
                return (Err(CallFailure::new(&error, attempts)), attempts);
            }

            if attempts >= self.policy.max_attempts {
                warn!(
                    dependency = %dependency,
                    attempt = attempts,
                    error_kind = %error.kind(),
                    "giving up after final attempt: {}", error
                );
                return (Err(CallFailure::new(&error, attempts)), attempts);
            }

            let delay = self.policy.delay_for(attempts, previous_delay, rand::random::<f64>());
            previous_delay = delay;
            crate::metrics::steps::retry(&dependency);
            warn!(
                dependency = %dependency,
                attempt = attempts,
                error_kind = %error.kind(),
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying: {}", error
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    debug!(dependency = %dependency, attempt = attempts, "retry wait cancelled");
                    let failure = CallFailure {
                        error_kind: ErrorKind::Cancelled,
                        attempts,
                        message: "retry wait cancelled".to_string(),
                    };
                    return (Err(failure), attempts);
                }
            }
        }
    }
}
