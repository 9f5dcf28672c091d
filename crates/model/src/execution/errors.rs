use crate::execution::{chunk::ChunkState, operation::SyncStatus};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal operation transition {from} -> {to}")]
    Operation { from: SyncStatus, to: SyncStatus },

    #[error("illegal chunk transition {from:?} -> {to:?}")]
    Chunk { from: ChunkState, to: ChunkState },
}
