pub mod config;
pub mod date_range;
pub mod ingest;
pub mod models;
pub mod report;
pub mod storage;
pub mod summary;

pub use date_range::DateRange;
