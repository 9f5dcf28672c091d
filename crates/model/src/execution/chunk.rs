use crate::{
    core::{
        date_range::DateRange,
        identifiers::{ChunkId, SchoolId},
    },
    execution::errors::TransitionError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkState {
    Pending,
    Fetching,
    Validating,
    Writing,
    Done,
    Failed,
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Done | ChunkState::Failed)
    }

    /// Forward-only pipeline order; any non-terminal state may fail.
    pub fn can_transition_to(&self, next: ChunkState) -> bool {
        use ChunkState::*;
        match (self, next) {
            (Pending, Fetching) => true,
            (Fetching, Validating) => true,
            (Validating, Writing) => true,
            (Writing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A date sub-range of one school, the unit of fetch, write and checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub date_range: DateRange,
    pub school_id: SchoolId,
    pub state: ChunkState,
    pub attempts: u32,
}

impl Chunk {
    pub fn new(school_id: SchoolId, date_range: DateRange) -> Self {
        Self {
            chunk_id: Self::id_for(&school_id, &date_range),
            date_range,
            school_id,
            state: ChunkState::Pending,
            attempts: 0,
        }
    }

    /// Pure function of school and range so a resumed run regenerates the same ids.
    pub fn id_for(school_id: &SchoolId, range: &DateRange) -> ChunkId {
        ChunkId::new(format!("chk-{}-{}", school_id, range.compact()))
    }

    pub fn advance(&mut self, next: ChunkState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::Chunk {
                from: self.state,
                to: next,
            });
        }
        if next == ChunkState::Fetching {
            self.attempts += 1;
        }
        self.state = next;
        Ok(())
    }
}
