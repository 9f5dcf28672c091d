use crate::{
    error::FetchError,
    guard::{Guarded, call_guarded},
    retry::classify_sis_error,
};
use connectors::{
    error::SisError,
    sis::{PageRequest, SisClient, SisPage},
};
use engine_core::{
    circuit_breaker::CircuitBreaker, metrics::Metrics, rate_limiter::RateLimiter,
    retry::{RetryError, RetryPolicy},
};
use model::{execution::chunk::Chunk, records::raw::RawRecord};
use std::sync::Arc;
use tracing::debug;

pub const SIS_RATE_KEY: &str = "sis";

/// Pulls every page for one chunk from the SIS. Each page request waits for
/// the rate limiter, consults the `sis` breaker and retries transient errors.
#[derive(Clone)]
pub struct ChunkFetcher {
    client: Arc<dyn SisClient>,
    limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    metrics: Metrics,
    max_records: usize,
}

impl ChunkFetcher {
    pub fn new(
        client: Arc<dyn SisClient>,
        limiter: RateLimiter,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        metrics: Metrics,
        max_records: usize,
    ) -> Self {
        Self {
            client,
            limiter,
            breaker,
            retry,
            metrics,
            max_records: max_records.max(1),
        }
    }

    pub async fn fetch(&self, chunk: &Chunk, page_size: usize) -> Result<Vec<RawRecord>, FetchError> {
        let mut request = PageRequest::first(
            chunk.school_id.clone(),
            chunk.date_range,
            page_size.max(1),
        );
        let mut records = Vec::new();

        loop {
            let page = self.fetch_page(&request).await?;
            records.extend(page.records);

            if records.len() > self.max_records {
                return Err(FetchError::ChunkTooLarge {
                    chunk_id: chunk.chunk_id.clone(),
                    limit: self.max_records,
                });
            }

            match page.next_page {
                Some(next) if next > request.page => request = request.next(next),
                Some(next) => {
                    return Err(FetchError::Fatal(SisError::Decode(format!(
                        "pagination went from page {} to {next}",
                        request.page
                    ))));
                }
                None => break,
            }
        }

        self.metrics.increment_records_fetched(records.len() as u64);
        debug!(
            chunk_id = %chunk.chunk_id,
            records = records.len(),
            pages = request.page,
            "Fetched chunk"
        );
        Ok(records)
    }

    async fn fetch_page(
        &self,
        request: &PageRequest,
    ) -> Result<SisPage, FetchError> {
        let (limiter, metrics, client) = (&self.limiter, &self.metrics, &self.client);
        let result = call_guarded(
            &self.retry,
            &self.breaker,
            &self.metrics,
            classify_sis_error,
            move || async move {
                limiter.acquire(SIS_RATE_KEY).await;
                metrics.increment_sis_requests();
                client.fetch_page(request).await
            },
        )
        .await;

        result.map_err(|err| match err {
            RetryError::Fatal(Guarded::Open(open))
            | RetryError::Exhausted {
                last: Guarded::Open(open),
                ..
            } => FetchError::CircuitOpen(open),
            RetryError::Fatal(Guarded::Call(err)) => FetchError::Fatal(err),
            RetryError::Exhausted {
                attempts,
                last: Guarded::Call(last),
            } => FetchError::RetriesExhausted { attempts, last },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use engine_core::{circuit_breaker::CircuitBreakerConfig, rate_limiter::RateLimit};
    use model::core::{date_range::DateRange, identifiers::SchoolId};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::{collections::VecDeque, time::Duration};

    struct ScriptedSis {
        responses: Mutex<VecDeque<Result<SisPage, SisError>>>,
        requests: Mutex<Vec<u32>>,
    }

    impl ScriptedSis {
        fn new(responses: Vec<Result<SisPage, SisError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SisClient for ScriptedSis {
        async fn fetch_page(&self, request: &PageRequest) -> Result<SisPage, SisError> {
            self.requests.lock().push(request.page);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(SisError::Server { status: 500 }))
        }
    }

    fn page(count: usize, next_page: Option<u32>) -> Result<SisPage, SisError> {
        Ok(SisPage {
            records: (0..count)
                .map(|i| RawRecord::from_value(json!({ "student_id": format!("S-{i}") })))
                .collect(),
            next_page,
        })
    }

    fn chunk() -> Chunk {
        Chunk::new(
            SchoolId::from("SCH-1"),
            DateRange::new(
                NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 9, 6).unwrap(),
            )
            .unwrap(),
        )
    }

    fn fetcher(sis: Arc<ScriptedSis>, max_records: usize) -> (ChunkFetcher, Arc<CircuitBreaker>) {
        let breaker = Arc::new(CircuitBreaker::new(
            "sis",
            CircuitBreakerConfig::new(3, Duration::from_secs(60)),
        ));
        let fetcher = ChunkFetcher::new(
            sis,
            RateLimiter::new(RateLimit::default()),
            breaker.clone(),
            RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(40)),
            Metrics::new(),
            max_records,
        );
        (fetcher, breaker)
    }

    #[tokio::test(start_paused = true)]
    async fn walks_pages_and_retries_transient_failures() {
        let sis = ScriptedSis::new(vec![
            page(2, Some(2)),
            Err(SisError::Timeout(Duration::from_secs(30))),
            page(1, None),
        ]);
        let (fetcher, _) = fetcher(sis.clone(), 100);

        let records = fetcher.fetch(&chunk(), 2).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(*sis.requests.lock(), vec![1, 2, 2]);
        assert_eq!(fetcher.metrics.snapshot().retries, 1);
        assert_eq!(fetcher.metrics.snapshot().records_fetched, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_chunks_over_the_record_cap() {
        let sis = ScriptedSis::new(vec![page(3, Some(2)), page(3, None)]);
        let (fetcher, _) = fetcher(sis, 5);

        match fetcher.fetch(&chunk(), 3).await {
            Err(FetchError::ChunkTooLarge { limit, .. }) => assert_eq!(limit, 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_fatal_after_one_request() {
        let sis = ScriptedSis::new(vec![Err(SisError::Auth { status: 401 })]);
        let (fetcher, breaker) = fetcher(sis.clone(), 100);

        assert!(matches!(
            fetcher.fetch(&chunk(), 10).await,
            Err(FetchError::Fatal(SisError::Auth { status: 401 }))
        ));
        assert_eq!(sis.requests.lock().len(), 1);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_outage_opens_the_circuit() {
        let sis = ScriptedSis::new(vec![]);
        let (fetcher, _) = fetcher(sis.clone(), 100);

        assert!(matches!(
            fetcher.fetch(&chunk(), 10).await,
            Err(FetchError::RetriesExhausted { attempts: 3, .. })
        ));
        assert!(matches!(
            fetcher.fetch(&chunk(), 10).await,
            Err(FetchError::CircuitOpen(_))
        ));
        assert_eq!(sis.requests.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_page_waits_for_the_upstream_hint() {
        let sis = ScriptedSis::new(vec![
            Err(SisError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            }),
            Err(SisError::RateLimited {
                retry_after: Some(Duration::from_secs(600)),
            }),
            page(1, None),
        ]);
        let fetcher = ChunkFetcher::new(
            sis.clone(),
            RateLimiter::new(RateLimit::default()),
            Arc::new(CircuitBreaker::new(
                "sis",
                CircuitBreakerConfig::new(5, Duration::from_secs(60)),
            )),
            RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(60)),
            Metrics::new(),
            100,
        );

        let started = tokio::time::Instant::now();
        let records = fetcher.fetch(&chunk(), 10).await.unwrap();
        let waited = started.elapsed();

        assert_eq!(records.len(), 1);
        assert_eq!(sis.requests.lock().len(), 3);
        // 30s from the first hint, then the second hint capped at 60s.
        assert!(waited >= Duration::from_secs(90), "waited {waited:?}");
        assert!(waited < Duration::from_secs(91), "waited {waited:?}");
    }
}
