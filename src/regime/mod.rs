// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Per-instrument directional (BULL/BEAR/RANGE/UNKNOWN) and volatility
// (LOW/NORMAL/HIGH) classification, recomputed at every bar-close from the
// instrument's `FeatureMap`. See `classifier` for the active implementation.

pub mod classifier;

pub use classifier::{Regime, RegimeClassifier};
