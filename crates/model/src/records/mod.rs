pub mod attendance;
pub mod failure;
pub mod raw;
