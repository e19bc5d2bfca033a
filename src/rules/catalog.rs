// =============================================================================
// Rule Catalog
// =============================================================================
//
// The fixed, canonical set of technical-pattern rules the engine evaluates at
// every bar-close. Each rule is a pure predicate over a `FeatureMap` plus a
// signed bias contributed toward the aggregate score when it fires. The
// catalog is immutable at runtime — there is no registration API, only this
// table — so a `const` array of fn-pointer-backed entries is the natural
// shape; no lazy-init crate is needed.

use crate::indicators::FeatureMap;
use crate::types::{DirectionalRegime, RuleClass};

/// All four directional regimes, for rules with no regime restriction beyond
/// the class-based sideways veto applied in `rules::engine`.
const ALL_REGIMES: &[DirectionalRegime] = &[
    DirectionalRegime::Bull,
    DirectionalRegime::Bear,
    DirectionalRegime::Range,
    DirectionalRegime::Unknown,
];

const BULL_ONLY: &[DirectionalRegime] = &[DirectionalRegime::Bull];
const BEAR_ONLY: &[DirectionalRegime] = &[DirectionalRegime::Bear];

/// One catalog entry: a name, its class (for the RANGE sideways veto), a
/// signed bias, the regimes in which it is eligible to fire at all, and the
/// predicate itself.
pub struct Rule {
    pub name: &'static str,
    pub class: RuleClass,
    pub bias: f64,
    pub allowed_regimes: &'static [DirectionalRegime],
    pub predicate: fn(&FeatureMap) -> bool,
}

fn golden_cross(f: &FeatureMap) -> bool {
    matches!((f.ema20, f.ema50), (Some(e20), Some(e50)) if e20 > e50)
}

fn death_cross(f: &FeatureMap) -> bool {
    matches!((f.ema20, f.ema50), (Some(e20), Some(e50)) if e20 < e50)
}

fn strong_uptrend(f: &FeatureMap) -> bool {
    matches!(
        (f.adx14, f.ema20, f.ema50, f.rsi14),
        (Some(adx), Some(e20), Some(e50), Some(rsi)) if adx > 25.0 && e20 > e50 && rsi > 50.0
    )
}

fn strong_downtrend(f: &FeatureMap) -> bool {
    matches!(
        (f.adx14, f.ema20, f.ema50, f.rsi14),
        (Some(adx), Some(e20), Some(e50), Some(rsi)) if adx > 25.0 && e20 < e50 && rsi < 50.0
    )
}

fn super_bullish(f: &FeatureMap) -> bool {
    matches!(
        (f.adx14, f.ema20, f.ema50, f.rsi14),
        (Some(adx), Some(e20), Some(e50), Some(rsi)) if adx > 30.0 && e20 > e50 && rsi > 55.0
    ) && f.breakout_high_20
}

fn super_bearish(f: &FeatureMap) -> bool {
    matches!(
        (f.adx14, f.ema20, f.ema50, f.rsi14),
        (Some(adx), Some(e20), Some(e50), Some(rsi)) if adx > 30.0 && e20 < e50 && rsi < 45.0
    ) && f.breakout_low_20
}

fn turtle_20_long(f: &FeatureMap) -> bool {
    f.breakout_high_20
}

fn turtle_20_short(f: &FeatureMap) -> bool {
    f.breakout_low_20
}

fn turtle_55_long(f: &FeatureMap) -> bool {
    f.breakout_high_55
}

fn turtle_55_short(f: &FeatureMap) -> bool {
    f.breakout_low_55
}

fn rsi_oversold(f: &FeatureMap) -> bool {
    matches!(f.rsi14, Some(rsi) if rsi < 30.0)
}

fn rsi_overbought(f: &FeatureMap) -> bool {
    matches!(f.rsi14, Some(rsi) if rsi > 70.0)
}

fn rsi_extreme_oversold(f: &FeatureMap) -> bool {
    matches!(f.rsi14, Some(rsi) if rsi < 20.0)
}

fn rsi_extreme_overbought(f: &FeatureMap) -> bool {
    matches!(f.rsi14, Some(rsi) if rsi > 80.0)
}

fn bb_oversold(f: &FeatureMap) -> bool {
    matches!(f.bb_lower, Some(lower) if f.close < lower)
}

fn bb_overbought(f: &FeatureMap) -> bool {
    matches!(f.bb_upper, Some(upper) if f.close > upper)
}

fn stoch_oversold(f: &FeatureMap) -> bool {
    matches!(f.stoch_k, Some(k) if k < 20.0)
}

fn stoch_overbought(f: &FeatureMap) -> bool {
    matches!(f.stoch_k, Some(k) if k > 80.0)
}

fn stoch_bullish_cross(f: &FeatureMap) -> bool {
    matches!((f.stoch_k, f.stoch_d), (Some(k), Some(d)) if k > d && k < 50.0)
}

/// The 19-rule canonical catalog. Order is irrelevant to the aggregate
/// result — `rules::engine` sums bias independent of array position.
pub const CATALOG: &[Rule] = &[
    Rule {
        name: "GOLDEN_CROSS",
        class: RuleClass::Trend,
        bias: 0.6,
        allowed_regimes: ALL_REGIMES,
        predicate: golden_cross,
    },
    Rule {
        name: "DEATH_CROSS",
        class: RuleClass::Trend,
        bias: -0.6,
        allowed_regimes: ALL_REGIMES,
        predicate: death_cross,
    },
    Rule {
        name: "STRONG_UPTREND",
        class: RuleClass::Trend,
        bias: 0.7,
        allowed_regimes: BULL_ONLY,
        predicate: strong_uptrend,
    },
    Rule {
        name: "STRONG_DOWNTREND",
        class: RuleClass::Trend,
        bias: -0.7,
        allowed_regimes: BEAR_ONLY,
        predicate: strong_downtrend,
    },
    Rule {
        name: "SUPER_BULLISH",
        class: RuleClass::Trend,
        bias: 0.95,
        allowed_regimes: BULL_ONLY,
        predicate: super_bullish,
    },
    Rule {
        name: "SUPER_BEARISH",
        class: RuleClass::Trend,
        bias: -0.95,
        allowed_regimes: BEAR_ONLY,
        predicate: super_bearish,
    },
    Rule {
        name: "TURTLE_20DAY_BREAKOUT_LONG",
        class: RuleClass::Breakout,
        bias: 0.7,
        allowed_regimes: ALL_REGIMES,
        predicate: turtle_20_long,
    },
    Rule {
        name: "TURTLE_20DAY_BREAKOUT_SHORT",
        class: RuleClass::Breakout,
        bias: -0.7,
        allowed_regimes: ALL_REGIMES,
        predicate: turtle_20_short,
    },
    Rule {
        name: "TURTLE_55DAY_BREAKOUT_LONG",
        class: RuleClass::Breakout,
        bias: 0.9,
        allowed_regimes: ALL_REGIMES,
        predicate: turtle_55_long,
    },
    Rule {
        name: "TURTLE_55DAY_BREAKOUT_SHORT",
        class: RuleClass::Breakout,
        bias: -0.9,
        allowed_regimes: ALL_REGIMES,
        predicate: turtle_55_short,
    },
    Rule {
        name: "RSI_OVERSOLD",
        class: RuleClass::MeanReversion,
        bias: 0.5,
        allowed_regimes: ALL_REGIMES,
        predicate: rsi_oversold,
    },
    Rule {
        name: "RSI_OVERBOUGHT",
        class: RuleClass::MeanReversion,
        bias: -0.5,
        allowed_regimes: ALL_REGIMES,
        predicate: rsi_overbought,
    },
    Rule {
        name: "RSI_EXTREME_OVERSOLD",
        class: RuleClass::MeanReversion,
        bias: 0.8,
        allowed_regimes: ALL_REGIMES,
        predicate: rsi_extreme_oversold,
    },
    Rule {
        name: "RSI_EXTREME_OVERBOUGHT",
        class: RuleClass::MeanReversion,
        bias: -0.8,
        allowed_regimes: ALL_REGIMES,
        predicate: rsi_extreme_overbought,
    },
    Rule {
        name: "BB_OVERSOLD",
        class: RuleClass::MeanReversion,
        bias: 0.6,
        allowed_regimes: ALL_REGIMES,
        predicate: bb_oversold,
    },
    Rule {
        name: "BB_OVERBOUGHT",
        class: RuleClass::MeanReversion,
        bias: -0.6,
        allowed_regimes: ALL_REGIMES,
        predicate: bb_overbought,
    },
    Rule {
        name: "STOCH_OVERSOLD",
        class: RuleClass::MeanReversion,
        bias: 0.5,
        allowed_regimes: ALL_REGIMES,
        predicate: stoch_oversold,
    },
    Rule {
        name: "STOCH_OVERBOUGHT",
        class: RuleClass::MeanReversion,
        bias: -0.5,
        allowed_regimes: ALL_REGIMES,
        predicate: stoch_overbought,
    },
    Rule {
        name: "STOCH_BULLISH_CROSS",
        class: RuleClass::Combo,
        bias: 0.6,
        allowed_regimes: ALL_REGIMES,
        predicate: stoch_bullish_cross,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_nineteen_rules() {
        assert_eq!(CATALOG.len(), 19);
    }

    #[test]
    fn all_names_are_unique() {
        let mut names: Vec<&str> = CATALOG.iter().map(|r| r.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn turtle_20_long_fires_on_breakout_flag_alone() {
        let f = FeatureMap {
            breakout_high_20: true,
            ..Default::default()
        };
        assert!(turtle_20_long(&f));
        assert!(!turtle_20_short(&f));
    }

    #[test]
    fn rsi_rules_respect_their_thresholds() {
        let oversold = FeatureMap {
            rsi14: Some(15.0),
            ..Default::default()
        };
        assert!(rsi_oversold(&oversold));
        assert!(rsi_extreme_oversold(&oversold));
        assert!(!rsi_overbought(&oversold));
    }

    #[test]
    fn strong_uptrend_requires_all_three_conditions() {
        let partial = FeatureMap {
            adx14: Some(30.0),
            ema20: Some(100.0),
            ema50: Some(90.0),
            rsi14: Some(40.0),
            ..Default::default()
        };
        assert!(!strong_uptrend(&partial));

        let full = FeatureMap {
            rsi14: Some(55.0),
            ..partial
        };
        assert!(strong_uptrend(&full));
    }

    #[test]
    fn bb_bands_require_band_presence() {
        let no_band = FeatureMap {
            close: 10.0,
            ..Default::default()
        };
        assert!(!bb_oversold(&no_band));
    }

    #[test]
    fn stoch_bullish_cross_requires_crossing_in_lower_half() {
        let crossed_high = FeatureMap {
            stoch_k: Some(70.0),
            stoch_d: Some(60.0),
            ..Default::default()
        };
        assert!(!stoch_bullish_cross(&crossed_high));

        let crossed_low = FeatureMap {
            stoch_k: Some(30.0),
            stoch_d: Some(25.0),
            ..Default::default()
        };
        assert!(stoch_bullish_cross(&crossed_low));
    }
}
