//! Retry and poll helpers
//!
//! `retry` wraps a single vendor call with exponential backoff until it
//! succeeds, fails permanently, or the timeout elapses. `StateConf` polls a
//! refresh function until the remote object reports a target status.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::error::BceError;

/// Backoff settings for `retry`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_multiplier).min(self.max_delay)
    }
}

/// Outcome of one attempt that did not succeed
#[derive(Debug)]
pub enum RetryError<E> {
    Retryable(E),
    NonRetryable(E),
}

#[derive(Debug, thiserror::Error)]
pub enum RetryFailure<E: fmt::Display + fmt::Debug> {
    #[error("timed out after {timeout:?}: {last}")]
    Timeout { timeout: Duration, last: E },

    #[error("{0}")]
    Failed(E),
}

/// Run `op` until it succeeds, returns a non-retryable error, or `timeout` elapses
pub async fn retry<T, E, F, Fut>(
    timeout: Duration,
    config: &RetryConfig,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    E: fmt::Display + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::NonRetryable(err)) => return Err(RetryFailure::Failed(err)),
            Err(RetryError::Retryable(err)) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(RetryFailure::Timeout { timeout, last: err });
                }
                let wait = delay.min(deadline - now);
                log::warn!("Attempt {} failed, retrying in {:?}: {}", attempt, wait, err);
                sleep(wait).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// `retry` with the default backoff, classifying errors with `BceError::is_retryable`
pub async fn retry_bce<T, F, Fut>(timeout: Duration, mut op: F) -> Result<T, BceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BceError>>,
{
    retry(timeout, &RetryConfig::default(), || {
        let attempt = op();
        async move {
            attempt.await.map_err(|err| {
                if err.is_retryable() {
                    RetryError::Retryable(err)
                } else {
                    RetryError::NonRetryable(err)
                }
            })
        }
    })
    .await
    .map_err(BceError::from)
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError<E: fmt::Display + fmt::Debug> {
    #[error("unexpected state '{status}', wanted target '{}'", .target.join(", "))]
    UnexpectedState { status: String, target: Vec<String> },

    #[error("failed to reach target state, got '{status}'")]
    Failed { status: String },

    #[error(
        "timeout while waiting for state to become '{}' (last state: '{}', timeout: {timeout:?})",
        .target.join(", "),
        .last_status.as_deref().unwrap_or("none")
    )]
    Timeout {
        target: Vec<String>,
        last_status: Option<String>,
        timeout: Duration,
    },

    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: usize },

    #[error("{0}")]
    Refresh(E),
}

/// Polling configuration for `wait_for_state`
#[derive(Debug, Clone, PartialEq)]
pub struct StateConf {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub fail: Vec<String>,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    pub poll_interval: Duration,
    /// Consecutive "object missing" refreshes tolerated before giving up
    pub not_found_checks: usize,
}

impl StateConf {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            fail: Vec::new(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            not_found_checks: 20,
        }
    }

    pub fn with_fail(mut self, fail: &[&str]) -> Self {
        self.fail = fail.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_not_found_checks(mut self, checks: usize) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Poll `refresh` until it reports a target status
    ///
    /// `refresh` yields `None` while the object cannot be found, or the object
    /// with its current status.
    pub async fn wait_for_state<T, E, F, Fut>(&self, mut refresh: F) -> Result<T, WaitError<E>>
    where
        E: fmt::Display + fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<(T, String)>, E>>,
    {
        let deadline = Instant::now() + self.timeout;
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut not_found = 0usize;
        let mut last_status: Option<String> = None;

        loop {
            match refresh().await.map_err(WaitError::Refresh)? {
                Some((value, status)) => {
                    not_found = 0;
                    log::debug!("Polled status '{}' (target: {:?})", status, self.target);
                    if self.target.contains(&status) {
                        return Ok(value);
                    }
                    if self.fail.contains(&status) {
                        return Err(WaitError::Failed { status });
                    }
                    if !self.pending.contains(&status) {
                        return Err(WaitError::UnexpectedState {
                            status,
                            target: self.target.clone(),
                        });
                    }
                    last_status = Some(status);
                }
                None => {
                    not_found += 1;
                    log::debug!("Object not found ({}/{})", not_found, self.not_found_checks);
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound {
                            checks: self.not_found_checks,
                        });
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    target: self.target.clone(),
                    last_status,
                    timeout: self.timeout,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Flaky(&'static str);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::default();
        let mut delay = config.initial_delay;
        for _ in 0..10 {
            delay = config.next_delay(delay);
        }
        assert_eq!(delay, config.max_delay);
        assert_eq!(
            config.next_delay(Duration::from_millis(500)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<&str, RetryFailure<Flaky>> =
            retry(Duration::from_secs(60), &RetryConfig::default(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RetryError::Retryable(Flaky("busy")))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_non_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry(Duration::from_secs(60), &RetryConfig::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryError::NonRetryable(Flaky("denied"))) }
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Failed(Flaky("denied")))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_times_out_with_last_error() {
        let start = Instant::now();
        let result: Result<(), _> = retry(Duration::from_secs(3), &RetryConfig::default(), || async {
            Err(RetryError::Retryable(Flaky("still busy")))
        })
        .await;

        match result {
            Err(RetryFailure::Timeout { timeout, last }) => {
                assert_eq!(timeout, Duration::from_secs(3));
                assert_eq!(last.0, "still busy");
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_bce_classifies_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), BceError> = retry_bce(Duration::from_secs(60), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(BceError::service(500, "InternalError", "busy", "r-1")),
                    _ => Err(BceError::service(400, "InvalidParameter", "bad", "r-2")),
                }
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), Some("InvalidParameter"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn statuses(sequence: &'static [&'static str]) -> impl FnMut() -> std::future::Ready<Result<Option<(usize, String)>, Flaky>> {
        let mut index = 0;
        move || {
            let status = sequence[index.min(sequence.len() - 1)];
            let result = if status.is_empty() {
                None
            } else {
                Some((index, status.to_string()))
            };
            index += 1;
            std::future::ready(Ok(result))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_reaches_target() {
        let conf = StateConf::new(&["creating", "updating"], &["available"], Duration::from_secs(600))
            .with_delay(Duration::from_secs(15));
        let start = Instant::now();

        let polls = conf
            .wait_for_state(statuses(&["creating", "updating", "available"]))
            .await
            .unwrap();

        assert_eq!(polls, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(15 + 5 + 5));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_reports_fail_status() {
        let conf = StateConf::new(&["creating"], &["available"], Duration::from_secs(600))
            .with_fail(&["unavailable"]);

        let err = conf
            .wait_for_state(statuses(&["creating", "unavailable"]))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Failed { ref status } if status == "unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_rejects_unexpected_status() {
        let conf = StateConf::new(&["creating"], &["available"], Duration::from_secs(600));

        let err = conf
            .wait_for_state(statuses(&["paused"]))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "unexpected state 'paused', wanted target 'available'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_with_last_status() {
        let conf = StateConf::new(&["creating"], &["available"], Duration::from_secs(30));

        let err = conf
            .wait_for_state(statuses(&["creating"]))
            .await
            .unwrap_err();

        match err {
            WaitError::Timeout { last_status, .. } => {
                assert_eq!(last_status.as_deref(), Some("creating"))
            }
            other => panic!("Expected timeout, got {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_tolerates_missing_object_a_limited_number_of_times() {
        let conf = StateConf::new(&["creating"], &["available"], Duration::from_secs(3600))
            .with_not_found_checks(2);

        let ok = conf
            .wait_for_state(statuses(&["", "", "available"]))
            .await;
        assert!(ok.is_ok());

        let err = conf
            .wait_for_state(statuses(&["", "", "", "available"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::NotFound { checks: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_propagates_refresh_errors() {
        let conf = StateConf::new(&["creating"], &["available"], Duration::from_secs(60));
        let err = conf
            .wait_for_state(|| async { Err::<Option<((), String)>, _>(Flaky("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Refresh(Flaky("boom"))));
    }
}
