pub mod audit;
pub mod circuit_breaker;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod progress;
pub mod rate_limiter;
pub mod retry;
pub mod state;
