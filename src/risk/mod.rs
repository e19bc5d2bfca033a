pub mod sizer;
pub mod veto;

pub use sizer::{round_to_tick, size_position, SizingOutcome};
pub use veto::{evaluate as evaluate_vetoes, VetoContext, VetoResult};
