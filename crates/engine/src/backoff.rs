//! Bounded polling with exponential backoff.
//!
//! Used wherever the target system only becomes consistent after some
//! asynchronous process completes (a generated artifact showing up
//! downstream, an installation finishing, an element rendering). Every poll
//! is bounded by its attempt budget; nothing here waits forever.
//!
//! Semantics: the probe runs once immediately, then up to `max_attempts`
//! more times. The k-th retry is preceded by a sleep of
//! `initial_delay * 2^(k-1)`, so a probe that fails N times before
//! succeeding waits `initial_delay * (2^N - 1)` in total.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Attempt budget and starting delay for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Retries allowed after the first evaluation
    pub max_attempts: u32,

    /// Sleep before the first retry; doubles on every retry after that
    pub initial_delay: Duration,
}

impl Backoff {
    pub const fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Smallest budget starting at `initial_delay` whose total sleep reaches `span`
    pub fn covering(span: Duration, initial_delay: Duration) -> Self {
        let mut backoff = Self::new(0, initial_delay);
        while backoff.budget() < span && backoff.max_attempts < 32 {
            backoff.max_attempts += 1;
        }
        backoff
    }

    /// Sleep preceding the given retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Total time slept if every retry is used
    pub fn budget(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|retry| self.delay_for(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }
}

/// Result of a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Satisfied {
        value: T,
        evaluations: u32,
        waited: Duration,
    },
    Exhausted {
        evaluations: u32,
        waited: Duration,
    },
}

impl<T> PollOutcome<T> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    pub fn waited(&self) -> Duration {
        match self {
            Self::Satisfied { waited, .. } | Self::Exhausted { waited, .. } => *waited,
        }
    }

    /// Treat exhaustion as a hard failure naming the awaited condition
    pub fn into_result(self, awaited: &str) -> EngineResult<T> {
        match self {
            Self::Satisfied { value, .. } => Ok(value),
            Self::Exhausted {
                evaluations,
                waited,
            } => Err(EngineError::Timeout(format!(
                "{} (gave up after {} checks over {:?})",
                awaited, evaluations, waited
            ))),
        }
    }
}

/// Poll until the probe yields a value
pub async fn poll_until_some<T, F, Fut>(backoff: Backoff, mut probe: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut waited = Duration::ZERO;
    let mut evaluations = 0u32;

    loop {
        evaluations += 1;
        if let Some(value) = probe().await {
            return PollOutcome::Satisfied {
                value,
                evaluations,
                waited,
            };
        }

        if evaluations > backoff.max_attempts {
            return PollOutcome::Exhausted {
                evaluations,
                waited,
            };
        }

        let delay = backoff.delay_for(evaluations);
        debug!(
            "Condition not met (check {}/{}), retrying in {:?}",
            evaluations,
            backoff.max_attempts + 1,
            delay
        );
        tokio::time::sleep(delay).await;
        waited += delay;
    }
}

/// Poll until the predicate holds
pub async fn poll_until<F, Fut>(backoff: Backoff, mut predicate: F) -> PollOutcome<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until_some(backoff, || {
        let check = predicate();
        async move { check.await.then_some(()) }
    })
    .await
}

/// Retry a fallible operation, returning the last error once the budget is spent
pub async fn retry<T, F, Fut>(backoff: Backoff, what: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut evaluations = 0u32;
    loop {
        evaluations += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if evaluations > backoff.max_attempts => return Err(e),
            Err(e) => {
                let delay = backoff.delay_for(evaluations);
                debug!("{} failed ({}), retrying in {:?}", what, e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn false_for(n: u32) -> impl FnMut() -> std::future::Ready<bool> {
        let mut calls = 0;
        move || {
            calls += 1;
            std::future::ready(calls > n)
        }
    }

    #[test]
    fn test_delay_doubles() {
        let backoff = Backoff::new(4, Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.budget(), Duration::from_millis(1500));
    }

    #[test]
    fn test_covering_reaches_span() {
        let backoff = Backoff::covering(Duration::from_secs(1), Duration::from_millis(100));
        // 100 + 200 + 400 = 700 < 1000 <= 1500
        assert_eq!(backoff.max_attempts, 4);
        assert_eq!(Backoff::covering(Duration::ZERO, Duration::from_millis(100)).max_attempts, 0);
    }

    #[test]
    fn test_delay_saturates() {
        let backoff = Backoff::new(64, Duration::from_secs(1));
        assert_eq!(backoff.delay_for(60), Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_doubling_waits() {
        let start = Instant::now();
        let outcome = poll_until(Backoff::new(5, Duration::from_millis(100)), false_for(3)).await;

        assert!(outcome.is_satisfied());
        assert_eq!(outcome.waited(), Duration::from_millis(700));
        assert!(start.elapsed() >= Duration::from_millis(700));
        match outcome {
            PollOutcome::Satisfied { evaluations, .. } => assert_eq!(evaluations, 4),
            PollOutcome::Exhausted { .. } => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_when_budget_too_small() {
        let outcome = poll_until(Backoff::new(2, Duration::from_millis(50)), false_for(10)).await;

        assert_eq!(
            outcome,
            PollOutcome::Exhausted {
                evaluations: 3,
                waited: Duration::from_millis(150),
            }
        );
        let err = outcome.into_result("video to appear").unwrap_err();
        assert!(matches!(err, EngineError::Timeout(ref what) if what.contains("video to appear")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_does_not_sleep() {
        let outcome = poll_until_some(Backoff::default(), || async { Some(42) }).await;
        assert_eq!(outcome.waited(), Duration::ZERO);
        assert_eq!(outcome.into_result("answer").unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: EngineResult<()> = retry(Backoff::new(2, Duration::from_millis(10)), "lookup", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(EngineError::Source(format!("attempt {}", n))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(EngineError::Source(ref m)) if m == "attempt 2"));
    }
}
