pub mod kv;
pub mod system_state;

pub use kv::{FileKvStore, KvStore};
pub use system_state::{AdaptiveParams, RiskLimits, StateStore, SystemState, TradeCounters};
