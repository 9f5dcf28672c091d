use connectors::error::{DatastoreError, SisError};
use engine_core::retry::RetryDisposition;

pub fn classify_sis_error(err: &SisError) -> RetryDisposition {
    match err {
        SisError::RateLimited {
            retry_after: Some(wait),
        } => RetryDisposition::RetryAfter(*wait),
        SisError::Timeout(_)
        | SisError::Connect(_)
        | SisError::RateLimited { retry_after: None }
        | SisError::Server { .. } => RetryDisposition::Retry,
        SisError::Auth { .. }
        | SisError::Client { .. }
        | SisError::Decode(_)
        | SisError::Config(_) => RetryDisposition::Stop,
    }
}

pub fn classify_datastore_error(err: &DatastoreError) -> RetryDisposition {
    match err {
        DatastoreError::Unavailable(_) => RetryDisposition::Retry,
        DatastoreError::Rejected(_) | DatastoreError::Config(_) | DatastoreError::Tls(_) => {
            RetryDisposition::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn upstream_trouble_is_retried() {
        assert_eq!(
            classify_sis_error(&SisError::Timeout(Duration::from_secs(30))),
            RetryDisposition::Retry
        );
        assert_eq!(
            classify_sis_error(&SisError::RateLimited { retry_after: None }),
            RetryDisposition::Retry
        );
        assert_eq!(
            classify_sis_error(&SisError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }),
            RetryDisposition::RetryAfter(Duration::from_secs(30))
        );
        assert_eq!(
            classify_sis_error(&SisError::Server { status: 503 }),
            RetryDisposition::Retry
        );
    }

    #[test]
    fn caller_mistakes_stop_immediately() {
        assert_eq!(
            classify_sis_error(&SisError::Auth { status: 401 }),
            RetryDisposition::Stop
        );
        assert_eq!(
            classify_sis_error(&SisError::Client { status: 404 }),
            RetryDisposition::Stop
        );
        assert_eq!(
            classify_datastore_error(&DatastoreError::Rejected("SQLSTATE 23502".into())),
            RetryDisposition::Stop
        );
        assert_eq!(
            classify_datastore_error(&DatastoreError::Unavailable("closed".into())),
            RetryDisposition::Retry
        );
    }
}
