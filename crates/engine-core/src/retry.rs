use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    /// Retryable, but the upstream asked for at least this much quiet first.
    RetryAfter(Duration),
    Stop,
}

impl RetryDisposition {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetryDisposition::Stop)
    }
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and bubbled up without consuming retry budget.
    Fatal(E),
    /// The error was retryable, but the configured attempts were exhausted.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Fatal(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Preset for SIS fetches: the upstream publishes a per-minute limit, so back off wide.
    pub fn for_upstream() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(30)).with_jitter(true)
    }

    /// Preset tuned for database calls (shorter delay, fewer attempts).
    pub fn for_database() -> Self {
        Self::new(4, Duration::from_millis(250), Duration::from_secs(5))
    }

    /// Executes the operation with the configured retry policy.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 1;

        loop {
            match op().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) => match classify(&err) {
                    RetryDisposition::Stop => return Err(RetryError::Fatal(err)),
                    disposition => {
                        if attempt >= self.max_attempts {
                            warn!(attempts = attempt, error = %err, "Retry attempts exhausted");
                            return Err(RetryError::Exhausted {
                                attempts: attempt,
                                last: err,
                            });
                        }

                        let delay = match disposition {
                            RetryDisposition::RetryAfter(hint) => {
                                self.delay_for(attempt).max(hint).min(self.max_delay)
                            }
                            _ => self.delay_for(attempt),
                        };
                        warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                },
            }
        }
    }

    /// Delay slept after the given (1-based) failed attempt, jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        // Equal jitter: keep half, randomize the rest.
        let half = delay / 2;
        let spread = delay.saturating_sub(half).as_millis() as u64;
        half + Duration::from_millis(fastrand::u64(0..=spread))
    }

    /// `min(base * 2^(attempt-1), cap)` without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let exponent = attempt.saturating_sub(1).min(20);
        let factor = 1u128 << exponent;
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(err: &TestError) -> RetryDisposition {
        match err {
            TestError::Transient => RetryDisposition::Retry,
            TestError::Permanent => RetryDisposition::Stop,
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1000));
        let delays: Vec<u64> = (1..=6)
            .map(|a| policy.backoff_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(400), Duration::from_secs(10)).with_jitter(true);
        for _ in 0..100 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(800));
        }
    }

    #[test]
    fn zero_attempts_are_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanently_failing_call_runs_exactly_max_attempts() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300));
        let calls: Arc<parking_lot::Mutex<Vec<Instant>>> = Arc::default();

        let result: Result<(), _> = policy
            .run(
                || {
                    let calls = calls.clone();
                    async move {
                        calls.lock().push(Instant::now());
                        Err(TestError::Transient)
                    }
                },
                classify,
            )
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("unexpected {other:?}"),
        }

        let calls = calls.lock();
        assert_eq!(calls.len(), 5);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] <= g[1]), "delays must not decrease");
        assert!(gaps.iter().all(|g| *g <= Duration::from_millis(300)));
        assert_eq!(gaps[0], Duration::from_millis(100));
        assert_eq!(gaps[3], Duration::from_millis(300));
    }

    #[tokio::test]
    async fn permanent_errors_do_not_consume_budget() {
        let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run(
                || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TestError::Permanent)
                    }
                },
                classify,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(TestError::Permanent))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .run(
                || {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(TestError::Transient)
                        } else {
                            Ok(42)
                        }
                    }
                },
                classify,
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_wait_hint_stretches_the_delay_up_to_the_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(20));
        let calls: Arc<parking_lot::Mutex<Vec<Instant>>> = Arc::default();
        let hints = [Duration::from_secs(5), Duration::from_secs(60)];

        let result: Result<(), _> = policy
            .run(
                || {
                    let calls = calls.clone();
                    async move {
                        calls.lock().push(Instant::now());
                        Err(TestError::Transient)
                    }
                },
                |_: &TestError| {
                    let seen = calls.lock().len();
                    RetryDisposition::RetryAfter(hints[(seen - 1).min(1)])
                },
            )
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        let calls = calls.lock();
        assert_eq!(calls[1] - calls[0], Duration::from_secs(5));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(20));
    }
}
