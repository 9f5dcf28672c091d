use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("date range start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn validate(&self) -> Result<(), DateRangeError> {
        Self::new(self.start, self.end).map(|_| ())
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Consecutive sub-ranges of at most `max_days` days, in ascending order.
    pub fn windows(&self, max_days: u32) -> Vec<DateRange> {
        let span = Days::new(u64::from(max_days.max(1)) - 1);
        let mut out = Vec::new();
        let mut cursor = self.start;

        while cursor <= self.end {
            let end = cursor
                .checked_add_days(span)
                .map_or(self.end, |tentative| tentative.min(self.end));
            out.push(DateRange { start: cursor, end });
            match end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }

        out
    }

    /// `YYYYMMDD-YYYYMMDD`, used in chunk identifiers.
    pub fn compact(&self) -> String {
        format!(
            "{}-{}",
            self.start.format("%Y%m%d"),
            self.end.format("%Y%m%d")
        )
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
