//! In-memory aggregation of one day of requests

pub mod combinations;
pub mod day;
pub mod index;
pub mod version;

pub use combinations::{percentiles, summarize_pairs, PercentileSummary};
pub use day::{DaySummary, MetricKey, PairCount, StatCount};
pub use index::{IndexError, IndexNode, MetricIndex, Row, RowValue, Rows};
pub use version::{compare_versions, compare_versions_desc};
