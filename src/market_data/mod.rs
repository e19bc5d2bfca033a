pub mod bar;
pub mod buffer;
pub mod ingest;

pub use bar::{Bar, DataValidator, EventType, MarketData, RejectReason};
pub use buffer::BarBuffer;
pub use ingest::{IngestHandle, LatencyMetrics};
