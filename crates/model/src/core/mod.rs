pub mod date_range;
pub mod identifiers;
