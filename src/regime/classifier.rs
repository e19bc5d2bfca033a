// =============================================================================
// Regime Classifier
// =============================================================================
//
// Two independent outputs per instrument, recomputed at every bar-close:
// a directional regime (BULL/BEAR/RANGE/UNKNOWN) with consecutive-bar
// hysteresis, and a volatility regime (LOW/NORMAL/HIGH) with none.
//
// Grounded on the reference engine's `RegimeDetector`: the `RwLock`-guarded
// per-instrument cache and age-tracking mechanism is kept; the five-way
// entropy/Hurst/BBW classification tree it used is fully replaced.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::FeatureMap;
use crate::types::{DirectionalRegime, VolatilityRegime};

/// ADX threshold above which directional conviction counts toward a
/// BULL/BEAR streak.
const ADX_TREND_THRESHOLD: f64 = 25.0;
/// ADX threshold below which a bar counts toward a RANGE streak.
const ADX_RANGE_THRESHOLD: f64 = 20.0;
/// Consecutive bars of ADX>25 with EMA20/EMA50 ordering required to flip
/// directional regime to BULL or BEAR.
const TREND_STREAK_REQUIRED: u32 = 3;
/// Consecutive bars of ADX<20 required to flip directional regime to RANGE.
const RANGE_STREAK_REQUIRED: u32 = 5;

const ATR_PCT_LOW_THRESHOLD: f64 = 0.5;
const ATR_PCT_HIGH_THRESHOLD: f64 = 1.5;

/// Combined regime reading for one instrument at one bar-close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regime {
    pub directional: DirectionalRegime,
    pub volatility: VolatilityRegime,
}

/// Per-instrument hysteresis counters. Deliberately not serialized into
/// `SystemState` — regime hysteresis resets to UNKNOWN on restart, which the
/// spec explicitly permits (see DESIGN.md Open Question (a)).
#[derive(Debug, Clone, Default)]
struct InstrumentCounters {
    directional: DirectionalRegime,
    bull_streak: u32,
    bear_streak: u32,
    range_streak: u32,
}

/// Thread-safe regime classifier caching the latest regime and hysteresis
/// counters per instrument.
pub struct RegimeClassifier {
    state: RwLock<HashMap<String, InstrumentCounters>>,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Classify the current regime for `instrument` given its freshly
    /// computed `FeatureMap`, advancing and applying hysteresis.
    pub fn update(&self, instrument: &str, features: &FeatureMap) -> Regime {
        let mut state = self.state.write();
        let counters = state.entry(instrument.to_string()).or_default();

        let trending_up = matches!(
            (features.adx14, features.ema20, features.ema50),
            (Some(adx), Some(e20), Some(e50)) if adx > ADX_TREND_THRESHOLD && e20 > e50
        );
        let trending_down = matches!(
            (features.adx14, features.ema20, features.ema50),
            (Some(adx), Some(e20), Some(e50)) if adx > ADX_TREND_THRESHOLD && e20 < e50
        );
        let ranging = matches!(features.adx14, Some(adx) if adx < ADX_RANGE_THRESHOLD);

        counters.bull_streak = if trending_up { counters.bull_streak + 1 } else { 0 };
        counters.bear_streak = if trending_down { counters.bear_streak + 1 } else { 0 };
        counters.range_streak = if ranging { counters.range_streak + 1 } else { 0 };

        if counters.bull_streak >= TREND_STREAK_REQUIRED {
            counters.directional = DirectionalRegime::Bull;
        } else if counters.bear_streak >= TREND_STREAK_REQUIRED {
            counters.directional = DirectionalRegime::Bear;
        } else if counters.range_streak >= RANGE_STREAK_REQUIRED {
            counters.directional = DirectionalRegime::Range;
        }
        // Otherwise the prior value is retained — this is the hysteresis.

        let volatility = match features.atr_pct {
            Some(pct) if pct < ATR_PCT_LOW_THRESHOLD => VolatilityRegime::Low,
            Some(pct) if pct > ATR_PCT_HIGH_THRESHOLD => VolatilityRegime::High,
            Some(_) => VolatilityRegime::Normal,
            None => VolatilityRegime::Normal,
        };

        let regime = Regime {
            directional: counters.directional,
            volatility,
        };

        debug!(
            instrument,
            directional = %regime.directional,
            volatility = %regime.volatility,
            bull_streak = counters.bull_streak,
            bear_streak = counters.bear_streak,
            range_streak = counters.range_streak,
            "regime updated"
        );

        regime
    }

    /// Return the last computed directional regime for `instrument` without
    /// recomputing, or `UNKNOWN` if never classified.
    pub fn current(&self, instrument: &str) -> DirectionalRegime {
        self.state
            .read()
            .get(instrument)
            .map(|c| c.directional)
            .unwrap_or_default()
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new()
    }
}
