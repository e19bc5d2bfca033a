// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators used
// by the trading engine, plus `FeatureMap`: the single named-scalar snapshot
// assembled from a bar buffer once per bar-close and handed to the regime
// classifier and rule engine. Every public function returns `Option<T>` so
// callers are forced to handle insufficient-data and numerical-edge-case
// scenarios — no exceptions escape the indicator layer.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod rsi;
pub mod stochastic;

use serde::{Deserialize, Serialize};

use crate::market_data::bar::Bar;

/// Minimum closed bars required before a `FeatureMap` is computed at all.
pub const MIN_BARS_FOR_FEATURES: usize = 50;

/// A named snapshot of every indicator computed from one instrument's bar
/// buffer at a single bar-close. Fields are `None` when the underlying
/// computation had insufficient samples or hit a division-by-zero guard —
/// per §4.4, the dependent field is simply omitted rather than panicking or
/// propagating an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureMap {
    pub instrument: String,
    pub close: f64,
    pub rsi14: Option<f64>,
    pub adx14: Option<f64>,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub atr14: Option<f64>,
    pub atr_pct: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub high_20: Option<f64>,
    pub low_20: Option<f64>,
    pub high_55: Option<f64>,
    pub low_55: Option<f64>,
    pub breakout_high_20: bool,
    pub breakout_low_20: bool,
    pub breakout_high_55: bool,
    pub breakout_low_55: bool,
    pub volume_sma20: Option<f64>,
}

/// Compute the full `FeatureMap` for `instrument` from its closed-bar window.
/// Returns `None` when fewer than `MIN_BARS_FOR_FEATURES` bars are available —
/// the caller should short-circuit the decision pipeline with no error in
/// that case, per §4.3.
pub fn compute_feature_map(instrument: &str, bars: &[Bar]) -> Option<FeatureMap> {
    if bars.len() < MIN_BARS_FOR_FEATURES {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let close = *closes.last()?;

    let rsi14 = rsi::calculate_rsi(&closes, 14).last().copied();
    let adx14 = adx::calculate_adx(bars, 14);
    let ema20 = ema::calculate_ema(&closes, 20).last().copied();
    let ema50 = ema::calculate_ema(&closes, 50).last().copied();
    let atr14 = atr::calculate_atr(bars, 14);
    let atr_pct = atr::calculate_atr_pct(bars, 14);
    let bb = bollinger::calculate_bollinger(&closes, 20, 2.0);
    let stoch = stochastic::calculate_stochastic(bars, 14, 3);

    let high_20 = rolling_high(bars, 20);
    let low_20 = rolling_low(bars, 20);
    let high_55 = rolling_high(bars, 55);
    let low_55 = rolling_low(bars, 55);

    // Breakout flags use the rolling window *excluding* the current close, so
    // the comparison is strict ("close > prior high", not "close >= its own
    // high").
    let (breakout_high_20, breakout_low_20) = breakout_flags(bars, close, 20);
    let (breakout_high_55, breakout_low_55) = breakout_flags(bars, close, 55);

    let volume_sma20 = volume_sma(bars, 20);

    Some(FeatureMap {
        instrument: instrument.to_string(),
        close,
        rsi14,
        adx14,
        ema20,
        ema50,
        atr14,
        atr_pct,
        bb_upper: bb.as_ref().map(|b| b.upper),
        bb_middle: bb.as_ref().map(|b| b.middle),
        bb_lower: bb.as_ref().map(|b| b.lower),
        stoch_k: stoch.map(|s| s.k),
        stoch_d: stoch.map(|s| s.d),
        high_20,
        low_20,
        high_55,
        low_55,
        breakout_high_20,
        breakout_low_20,
        breakout_high_55,
        breakout_low_55,
        volume_sma20,
    })
}

fn rolling_high(bars: &[Bar], n: usize) -> Option<f64> {
    if bars.len() < n {
        return None;
    }
    bars[bars.len() - n..]
        .iter()
        .map(|b| b.high)
        .fold(None, |acc, h| match acc {
            None => Some(h),
            Some(m) => Some(m.max(h)),
        })
}

fn rolling_low(bars: &[Bar], n: usize) -> Option<f64> {
    if bars.len() < n {
        return None;
    }
    bars[bars.len() - n..]
        .iter()
        .map(|b| b.low)
        .fold(None, |acc, l| match acc {
            None => Some(l),
            Some(m) => Some(m.min(l)),
        })
}

/// Strict breakout of the current close above/below the rolling N-bar
/// high/low computed over the *prior* N bars (excludes the current bar).
fn breakout_flags(bars: &[Bar], close: f64, n: usize) -> (bool, bool) {
    if bars.len() < n + 1 {
        return (false, false);
    }
    let prior = &bars[bars.len() - n - 1..bars.len() - 1];
    let prior_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let prior_low = prior.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    (close > prior_high, close < prior_low)
}

fn volume_sma(bars: &[Bar], n: usize) -> Option<f64> {
    if bars.len() < n {
        return None;
    }
    let window = &bars[bars.len() - n..];
    let sum: f64 = window.iter().map(|b| b.volume).sum();
    Some(sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time: u64, close: f64) -> Bar {
        Bar {
            instrument: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + 60_000,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            is_closed: true,
        }
    }

    #[test]
    fn insufficient_bars_returns_none() {
        let bars: Vec<Bar> = (0..49).map(|i| bar(i * 1000, 100.0 + i as f64)).collect();
        assert!(compute_feature_map("BTCUSDT", &bars).is_none());
    }

    #[test]
    fn ascending_series_produces_full_feature_map() {
        let bars: Vec<Bar> = (0..60).map(|i| bar(i * 1000, 100.0 + i as f64)).collect();
        let fm = compute_feature_map("BTCUSDT", &bars).unwrap();
        assert_eq!(fm.instrument, "BTCUSDT");
        assert!(fm.rsi14.is_some());
        assert!(fm.adx14.is_some());
        assert!(fm.ema20.is_some());
        assert!(fm.atr14.is_some());
        assert!(fm.bb_upper.is_some());
        assert!(fm.stoch_k.is_some());
        assert!(fm.high_20.is_some());
        assert!(fm.volume_sma20 == Some(10.0));
        // Strictly ascending series should produce a high_20 breakout.
        assert!(fm.breakout_high_20);
        assert!(!fm.breakout_low_20);
    }

    #[test]
    fn ema50_requires_fifty_closes() {
        let bars: Vec<Bar> = (0..60).map(|i| bar(i * 1000, 100.0 + i as f64)).collect();
        let fm = compute_feature_map("BTCUSDT", &bars).unwrap();
        assert!(fm.ema50.is_some());
    }

    #[test]
    fn flat_series_has_no_breakout() {
        let bars: Vec<Bar> = (0..60).map(|i| bar(i * 1000, 100.0)).collect();
        let fm = compute_feature_map("BTCUSDT", &bars).unwrap();
        assert!(!fm.breakout_high_20);
        assert!(!fm.breakout_low_20);
    }
}
