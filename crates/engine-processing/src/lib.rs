pub mod chunker;
pub mod error;
pub mod fetcher;
pub mod guard;
pub mod retry;
pub mod state_manager;
pub mod validation;
pub mod writer;
