pub mod datastore;
pub mod error;
pub mod sis;
