mod record;
mod stats;

pub use record::{Cms, RecordField, RequestRecord, TOTAL_HITS_METRIC};
pub(crate) use stats::MetricPointRow;
pub use stats::{date_key, CombinationRow, CombinationSummary, DailyMetricRow, MetricPoint};
