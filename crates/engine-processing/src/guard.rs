use engine_core::{
    circuit_breaker::{CircuitBreaker, CircuitOpen},
    metrics::Metrics,
    retry::{RetryDisposition, RetryError, RetryPolicy},
};
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

/// Failure of one guarded attempt.
#[derive(Debug)]
pub enum Guarded<E> {
    Open(CircuitOpen),
    Call(E),
}

impl<E: fmt::Display> fmt::Display for Guarded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guarded::Open(open) => open.fmt(f),
            Guarded::Call(err) => err.fmt(f),
        }
    }
}

/// Runs `op` under the retry policy with the breaker consulted before every
/// attempt. Retryable failures count against the breaker; fatal ones are
/// neutral. An open circuit ends the retry loop at once.
pub async fn call_guarded<F, Fut, T, E>(
    retry: &RetryPolicy,
    breaker: &Arc<CircuitBreaker>,
    metrics: &Metrics,
    classify: fn(&E) -> RetryDisposition,
    mut op: F,
) -> Result<T, RetryError<Guarded<E>>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = AtomicU32::new(0);

    retry
        .run(
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics.increment_retries();
                }
                let attempt = breaker.try_acquire().map(|permit| (permit, op()));

                async move {
                    let (permit, call) = attempt.map_err(Guarded::Open)?;
                    match call.await {
                        Ok(value) => {
                            permit.success();
                            Ok(value)
                        }
                        Err(err) => {
                            if classify(&err).is_retryable() {
                                permit.failure();
                            } else {
                                permit.neutral();
                            }
                            Err(Guarded::Call(err))
                        }
                    }
                }
            },
            |err: &Guarded<E>| match err {
                Guarded::Open(_) => RetryDisposition::Stop,
                Guarded::Call(err) => classify(err),
            },
        )
        .await
}
