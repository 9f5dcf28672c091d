pub mod checkpoint;
pub mod chunk;
pub mod circuit;
pub mod errors;
pub mod operation;
