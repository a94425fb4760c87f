//! Retry policy for remote calls
//!
//! Transient failures are retried with capped exponential backoff; everything
//! else propagates on the first attempt. How a "not found" answer is treated
//! is chosen per call site through [`NotFoundMode`].

use super::error::SyncError;
use super::synchronizer::Operation;
use crate::remote::RemoteError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff parameters shared by every remote call a driver makes
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first attempt
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread delays by ±20% so concurrent reconcilers don't retry in lockstep
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if delay_ms.is_finite() {
            Duration::from_millis(delay_ms as u64)
        } else {
            self.max_delay
        };
        let capped = delay.min(self.max_delay);

        if self.use_jitter {
            jitter(capped)
        } else {
            capped
        }
    }

    /// Bind this policy to one call site
    pub fn call(
        &self,
        resource_type: &str,
        operation: Operation,
        not_found: NotFoundMode,
    ) -> RemoteCall<'_> {
        RemoteCall {
            policy: self,
            resource_type: resource_type.to_string(),
            operation,
            not_found,
        }
    }
}

pub(crate) fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

/// What a 404 from the remote system means at a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundMode {
    /// The resource may not be visible yet; retry like a transient failure
    Retry,
    /// The resource is expected to disappear; report absence as success
    Absent,
}

/// Result of a remote call that may legitimately find nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    /// Remote answered "not found" under [`NotFoundMode::Absent`]
    NotFound,
}

impl<T> Outcome<T> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Retry policy bound to one resource type, operation and not-found mode
#[derive(Debug, Clone)]
pub struct RemoteCall<'a> {
    policy: &'a RetryPolicy,
    resource_type: String,
    operation: Operation,
    not_found: NotFoundMode,
}

impl RemoteCall<'_> {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn not_found(&self) -> NotFoundMode {
        self.not_found
    }

    /// Run `request` until it succeeds, fails permanently, or the attempt ceiling is hit
    pub async fn run<T, F, Fut>(&self, label: &str, mut request: F) -> Result<Outcome<T>, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match request().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            "{} {} {}: succeeded on attempt {}",
                            self.resource_type,
                            self.operation,
                            label,
                            attempt
                        );
                    }
                    return Ok(Outcome::Completed(value));
                }
                Err(error) => error,
            };

            if error.is_not_found() {
                if self.not_found == NotFoundMode::Absent {
                    tracing::debug!(
                        "{} {} {}: not found, treating as absent",
                        self.resource_type,
                        self.operation,
                        label
                    );
                    return Ok(Outcome::NotFound);
                }
                if attempt >= max_attempts {
                    tracing::warn!(
                        "{} {} {}: still not found after {} attempts",
                        self.resource_type,
                        self.operation,
                        label,
                        attempt
                    );
                    return Err(SyncError::NotFound {
                        resource_type: self.resource_type.clone(),
                        operation: self.operation,
                        attempts: attempt,
                    });
                }
            } else if !error.is_transient() || attempt >= max_attempts {
                tracing::warn!(
                    "{} {} {}: giving up after {} attempt(s): {}",
                    self.resource_type,
                    self.operation,
                    label,
                    attempt,
                    error
                );
                return Err(SyncError::Remote {
                    resource_type: self.resource_type.clone(),
                    operation: self.operation,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::debug!(
                "{} {} {}: attempt {} failed ({}), retrying in {:?}",
                self.resource_type,
                self.operation,
                label,
                attempt,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            use_jitter: false,
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let policy = fast_policy(3);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let call = policy.call("db", Operation::Create, NotFoundMode::Retry);

        let result = call
            .run("create", || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RemoteError::from_status(StatusCode::SERVICE_UNAVAILABLE, "busy"))
                } else {
                    Ok("created")
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Outcome::Completed("created"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_propagate_without_retry() {
        let policy = fast_policy(5);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let call = policy.call("db", Operation::Update, NotFoundMode::Retry);

        let err = call
            .run("update", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RemoteError::from_status(StatusCode::BAD_REQUEST, "bad field"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SyncError::Remote { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate() {
        let policy = fast_policy(3);
        let call = policy.call("db", Operation::Read, NotFoundMode::Retry);

        let err = call
            .run("get", || async {
                Err::<(), _>(RemoteError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Remote { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_not_found_absent_is_success() {
        let policy = fast_policy(5);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let call = policy.call("db", Operation::Delete, NotFoundMode::Absent);

        let result = call
            .run("delete", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RemoteError::from_status(StatusCode::NOT_FOUND, "gone"))
            })
            .await
            .unwrap();

        assert!(result.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_retry_escalates_to_not_found() {
        let policy = fast_policy(2);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let call = policy.call("db", Operation::Read, NotFoundMode::Retry);

        let err = call
            .run("get", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RemoteError::from_status(StatusCode::NOT_FOUND, "gone"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, SyncError::NotFound { attempts: 2, .. }));
    }
}
