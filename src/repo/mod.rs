/// In-memory stores owned by the reconciliation engine
pub mod buffer;
pub mod dedup;

pub use buffer::{ChartKind, RollingBuffer, RollingPoint, SeriesKey, SeriesRepo};
pub use dedup::DedupRegistry;
