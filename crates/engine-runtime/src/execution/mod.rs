pub mod chunk_task;
pub mod workers;

pub use chunk_task::{ChunkOutcome, ChunkTask};
pub use workers::OperationDriver;
