use model::{
    core::{
        date_range::DateRange,
        identifiers::{RunKey, SchoolId},
    },
    execution::chunk::Chunk,
};

pub const DEFAULT_MAX_DAYS: u32 = 7;

/// Splits a date range across schools into bounded, deterministic chunks.
#[derive(Debug, Clone, Copy)]
pub struct DateRangeChunker {
    max_days: u32,
}

impl Default for DateRangeChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DAYS)
    }
}

impl DateRangeChunker {
    pub fn new(max_days: u32) -> Self {
        Self {
            max_days: max_days.max(1),
        }
    }

    /// Picks a window size so that one chunk stays under `max_records` given an
    /// estimate of records a school produces per day. Never exceeds `max_days`.
    pub fn from_record_cap(max_days: u32, max_records: usize, daily_records_per_school: usize) -> Self {
        if daily_records_per_school == 0 {
            return Self::new(max_days);
        }
        let fitting = (max_records / daily_records_per_school).max(1);
        let days = u32::try_from(fitting).unwrap_or(u32::MAX);
        Self::new(days.min(max_days.max(1)))
    }

    pub fn max_days(&self) -> u32 {
        self.max_days
    }

    /// School-major, then ascending date windows. Repeated schools are dropped
    /// and the first occurrence keeps its position.
    pub fn split(&self, range: &DateRange, schools: &[SchoolId]) -> Vec<Chunk> {
        let windows = range.windows(self.max_days);
        let mut seen: Vec<&SchoolId> = Vec::with_capacity(schools.len());
        let mut chunks = Vec::with_capacity(windows.len() * schools.len());

        for school in schools {
            if seen.contains(&school) {
                continue;
            }
            seen.push(school);
            chunks.extend(
                windows
                    .iter()
                    .map(|window| Chunk::new(school.clone(), *window)),
            );
        }

        chunks
    }

    /// Checkpoint scope for a plan. Same range, same school set and same window
    /// size always hash to the same key, regardless of school order.
    pub fn run_key(&self, range: &DateRange, schools: &[SchoolId]) -> RunKey {
        let mut sorted: Vec<&str> = schools.iter().map(|s| s.as_str()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = blake3::Hasher::new();
        hasher.update(range.start.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(range.end.to_string().as_bytes());
        for school in sorted {
            hasher.update(b"|");
            hasher.update(school.as_bytes());
        }
        hasher.update(b"|");
        hasher.update(self.max_days.to_string().as_bytes());

        let hash = hasher.finalize().to_hex();
        RunKey::new(format!("run-{}", &hash[..16]))
    }
}
