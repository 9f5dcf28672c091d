use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(60, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterSnapshot {
    pub key: String,
    pub max_requests: u32,
    pub window_secs: u64,
    pub in_window: usize,
    pub queued: usize,
    pub utilization: f64,
}

/// Sliding-window limiter keyed by upstream.
///
/// Every caller reserves the earliest instant at which it may go, so waiters
/// are admitted in arrival order and no window of length `window` ever sees
/// more than `max_requests` admissions. Dropping an `acquire` future after the
/// reservation is made forfeits the slot.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: RateLimit,
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: Arc::default(),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Waits until the key may issue another request. Never rejects.
    pub async fn acquire(&self, key: &str) {
        let admit_at = self.reserve(key);
        let now = Instant::now();
        if admit_at > now {
            debug!(
                key,
                wait_ms = (admit_at - now).as_millis() as u64,
                "Rate limit reached, waiting for slot"
            );
            sleep_until(admit_at).await;
        }
    }

    fn reserve(&self, key: &str) -> Instant {
        let now = Instant::now();
        let max = self.limit.max_requests as usize;
        let mut windows = self.windows.lock();
        let slots = windows.entry(key.to_string()).or_default();
        Self::prune(slots, now, self.limit.window);

        let mut admit_at = now;
        if slots.len() >= max {
            admit_at = admit_at.max(slots[slots.len() - max] + self.limit.window);
        }
        if let Some(last) = slots.back() {
            admit_at = admit_at.max(*last);
        }

        slots.push_back(admit_at);
        admit_at
    }

    fn prune(slots: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = slots.front() {
            if *front + window <= now {
                slots.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admissions in the current window divided by the ceiling.
    pub fn utilization(&self, key: &str) -> f64 {
        self.snapshot(key).utilization
    }

    pub fn snapshot(&self, key: &str) -> RateLimiterSnapshot {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let (in_window, queued) = match windows.get_mut(key) {
            Some(slots) => {
                Self::prune(slots, now, self.limit.window);
                let queued = slots.iter().filter(|at| **at > now).count();
                (slots.len() - queued, queued)
            }
            None => (0, 0),
        };

        RateLimiterSnapshot {
            key: key.to_string(),
            max_requests: self.limit.max_requests,
            window_secs: self.limit.window.as_secs(),
            in_window,
            queued,
            utilization: in_window as f64 / self.limit.max_requests as f64,
        }
    }

    pub fn snapshots(&self) -> Vec<RateLimiterSnapshot> {
        let mut keys: Vec<String> = self.windows.lock().keys().cloned().collect();
        keys.sort();
        keys.iter().map(|key| self.snapshot(key)).collect()
    }
}
