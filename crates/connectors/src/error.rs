use std::time::Duration;
use thiserror::Error;

/// Failures talking to the Student Information System.
#[derive(Debug, Error)]
pub enum SisError {
    #[error("SIS request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to connect to SIS: {0}")]
    Connect(String),

    #[error("SIS rate limit hit (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("SIS server error: HTTP {status}")]
    Server { status: u16 },

    #[error("SIS rejected credentials: HTTP {status}")]
    Auth { status: u16 },

    #[error("SIS rejected request: HTTP {status}")]
    Client { status: u16 },

    #[error("Failed to decode SIS response: {0}")]
    Decode(String),

    #[error("Invalid SIS client configuration: {0}")]
    Config(String),
}

impl SisError {
    /// Transient failures say the upstream is struggling and are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SisError::Timeout(_)
                | SisError::Connect(_)
                | SisError::RateLimited { .. }
                | SisError::Server { .. }
        )
    }

    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => SisError::RateLimited { retry_after },
            401 | 403 => SisError::Auth { status },
            500..=599 => SisError::Server { status },
            _ => SisError::Client { status },
        }
    }
}

/// Failures writing to the attendance datastore.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    #[error("Datastore rejected batch: {0}")]
    Rejected(String),

    #[error("Invalid datastore configuration: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl DatastoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DatastoreError::Unavailable(_))
    }
}

impl From<tokio_postgres::Error> for DatastoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return DatastoreError::Unavailable(err.to_string());
        }

        match err.code() {
            // No SQLSTATE means the failure happened below the protocol (I/O, TLS).
            None => DatastoreError::Unavailable(err.to_string()),
            Some(code) => {
                let code = code.code();
                let transient = code.starts_with("08")
                    || code.starts_with("53")
                    || code.starts_with("57P")
                    || code == "40001"
                    || code == "40P01";
                if transient {
                    DatastoreError::Unavailable(format!("SQLSTATE {code}"))
                } else {
                    DatastoreError::Rejected(format!("SQLSTATE {code}"))
                }
            }
        }
    }
}
