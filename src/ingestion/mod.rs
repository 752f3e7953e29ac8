//! Listing ingestion - functional pipeline from collector output to stored rows

pub mod enrich;
pub mod fetch;
pub mod parse;
pub mod types;
pub mod utils;
pub mod write;

pub use types::*;
