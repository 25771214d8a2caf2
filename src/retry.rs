//! Exponential backoff with jitter for remote calls.
//!
//! Errors decide for themselves whether another attempt is worthwhile through
//! [`Retryable`]; anything that looks like a client mistake or an auth problem
//! fails on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::error::Elapsed;

/// Upper bound of the random jitter, as a fraction of the base delay.
pub const JITTER_RATIO: f64 = 0.3;

const NON_RETRYABLE_STATUSES: [u16; 5] = [400, 401, 403, 404, 422];
const NON_RETRYABLE_PATTERNS: [&str; 5] =
    ["unauthorized", "forbidden", "not found", "invalid", "validation"];

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Shared classifier: client errors and auth failures are never retried.
pub fn is_non_retryable(status: Option<u16>, message: &str) -> bool {
    if let Some(status) = status {
        if NON_RETRYABLE_STATUSES.contains(&status) {
            return true;
        }
    }
    let message = message.to_lowercase();
    NON_RETRYABLE_PATTERNS.iter().any(|p| message.contains(p))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Default::default()
        }
    }

    /// Single file upload.
    pub fn upload() -> Self {
        Self::new(5, Duration::from_millis(2000))
    }

    /// One of the frames extracted from a video.
    pub fn frame_upload() -> Self {
        Self::new(4, Duration::from_millis(1500))
    }

    /// Model invocation.
    pub fn inference() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }

    /// `min(initial × factor^attempt, max)`, attempt is 0-indexed.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Base delay plus `jitter × 30%` of it. `jitter` is clamped to `[0, 1]`.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.base_delay(attempt);
        base + base.mul_f64(JITTER_RATIO * jitter.clamp(0.0, 1.0))
    }
}

pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::debug!(operation = operation_name, error = %e, "non-retryable error");
                return Err(e);
            }
            Err(e) if attempt >= policy.max_retries => {
                tracing::warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %e,
                    "retries exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt, rand::thread_rng().gen::<f64>());
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );
                crate::metrics::increment_retries(operation_name);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Like [`retry_with_backoff`], with every attempt raced against `timeout`.
/// An attempt that loses the race counts as a failure of type `E`.
pub async fn retry_with_timeout<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    timeout: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display + From<Elapsed>,
{
    retry_with_backoff(policy, operation_name, || {
        let attempt = operation();
        async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(elapsed) => Err(E::from(elapsed)),
            }
        }
    })
    .await
}

pub type BatchOperation<'a, T, E> = Box<dyn FnMut() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    pub index: usize,
    pub result: Result<T, E>,
}

impl<T, E> BatchOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs independent operations one after another, each with its own retry
/// budget. A failure is recorded and the batch moves on.
pub async fn retry_batch<'a, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    operations: Vec<BatchOperation<'a, T, E>>,
) -> Vec<BatchOutcome<T, E>>
where
    E: Retryable + Display,
{
    let mut outcomes = Vec::with_capacity(operations.len());
    for (index, mut operation) in operations.into_iter().enumerate() {
        let result = retry_with_backoff(policy, operation_name, || operation()).await;
        if let Err(e) = &result {
            tracing::warn!(operation = operation_name, index, error = %e, "batch item failed");
        }
        outcomes.push(BatchOutcome { index, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Debug)]
    struct TestError {
        status: Option<u16>,
        message: String,
    }

    impl TestError {
        fn status(status: u16) -> Self {
            Self {
                status: Some(status),
                message: format!("HTTP {status}"),
            }
        }
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.message)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            !is_non_retryable(self.status, &self.message)
        }
    }

    impl From<Elapsed> for TestError {
        fn from(_: Elapsed) -> Self {
            Self {
                status: None,
                message: "attempt timed out".into(),
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(10))
    }

    #[test]
    fn classifier_matches_statuses_and_messages() {
        for status in [400, 401, 403, 404, 422] {
            assert!(is_non_retryable(Some(status), ""));
        }
        assert!(!is_non_retryable(Some(500), "Internal Server Error"));
        assert!(!is_non_retryable(Some(503), ""));
        assert!(is_non_retryable(None, "User is Unauthorized"));
        assert!(is_non_retryable(None, "Validation failed for field name"));
        assert!(is_non_retryable(Some(500), "Invalid schema"));
        assert!(!is_non_retryable(None, "connection reset by peer"));
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(3), Duration::from_millis(8000));
        assert_eq!(policy.base_delay(4), Duration::from_millis(10_000));
        assert_eq!(policy.base_delay(12), Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let policy = RetryPolicy::default();
        for attempt in 0..6 {
            let base = policy.base_delay(attempt);
            assert_eq!(policy.delay_for(attempt, 0.0), base);
            let top = policy.delay_for(attempt, 1.0);
            assert!(top <= base.mul_f64(1.3) + Duration::from_micros(1));
            assert!(policy.delay_for(attempt, 0.5) > base);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_runs_once() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), TestError> = retry_with_backoff(&fast_policy(5), "lookup", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::status(404)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(&fast_policy(3), "upload", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::status(503))
                } else {
                    Ok("file_url")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "file_url");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), TestError> = retry_with_backoff(&fast_policy(2), "invoke", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(TestError {
                    status: Some(500),
                    message: format!("boom {n}"),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().message, "boom 2");
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_the_policy() {
        let policy = RetryPolicy {
            max_retries: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
        };
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let _: Result<(), TestError> = retry_with_backoff(&policy, "timing", || {
            stamps.lock().unwrap().push(Instant::now());
            async { Err(TestError::status(500)) }
        })
        .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 5);
        for (attempt, pair) in stamps.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            let base = policy.base_delay(attempt as u32);
            assert!(gap >= base, "attempt {attempt}: {gap:?} < {base:?}");
            assert!(
                gap <= base.mul_f64(1.3) + Duration::from_millis(1),
                "attempt {attempt}: {gap:?} too long"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_retryable_failure() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_timeout(
            &fast_policy(2),
            "slow",
            Duration::from_millis(50),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, TestError>(n)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_keeps_going_after_failures() {
        let ops: Vec<BatchOperation<'static, u32, TestError>> = vec![
            Box::new(|| Box::pin(async { Ok(1) })),
            Box::new(|| Box::pin(async { Err(TestError::status(403)) })),
            Box::new(|| Box::pin(async { Ok(3) })),
        ];

        let outcomes = retry_batch(&fast_policy(1), "batch", ops).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert_eq!(outcomes[1].index, 1);
        assert_eq!(*outcomes[2].result.as_ref().unwrap(), 3);
    }
}
