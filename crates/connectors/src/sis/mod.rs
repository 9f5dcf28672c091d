use crate::error::SisError;
use async_trait::async_trait;
use model::{
    core::{date_range::DateRange, identifiers::SchoolId},
    records::raw::RawRecord,
};

pub mod http;

/// One page of attendance for a school over a date window. Pages start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub school_id: SchoolId,
    pub date_range: DateRange,
    pub page: u32,
    pub page_size: usize,
}

impl PageRequest {
    pub fn first(school_id: SchoolId, date_range: DateRange, page_size: usize) -> Self {
        Self {
            school_id,
            date_range,
            page: 1,
            page_size,
        }
    }

    pub fn next(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SisPage {
    pub records: Vec<RawRecord>,
    pub next_page: Option<u32>,
}

/// Read-only access to the SIS attendance feed.
#[async_trait]
pub trait SisClient: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SisPage, SisError>;
}
