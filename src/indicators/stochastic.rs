// =============================================================================
// Stochastic Oscillator (14, 3, 3)
// =============================================================================
//
// %K = 100 * (close - low14) / (high14 - low14)
// %D = SMA3(%K)
//
// %K is computed over the trailing `k_period` bars; %D smooths the last
// `d_period` %K values with a simple moving average.
// =============================================================================

use crate::market_data::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the most recent Stochastic %K/%D pair from a slice of closed bars.
///
/// Returns `None` when:
/// - `k_period` or `d_period` is zero.
/// - Fewer than `k_period + d_period - 1` bars are available (enough trailing
///   bars to produce `d_period` distinct %K values to average into %D).
/// - `high14 == low14` for any window needed (division guard).
pub fn calculate_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> Option<StochasticResult> {
    if k_period == 0 || d_period == 0 {
        return None;
    }
    if bars.len() < k_period + d_period - 1 {
        return None;
    }

    let mut k_values = Vec::with_capacity(d_period);
    for i in 0..d_period {
        let end = bars.len() - i;
        let window = &bars[end - k_period..end];
        let close = window.last()?.close;
        let high14 = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low14 = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        if high14 == low14 {
            return None;
        }

        let k = 100.0 * (close - low14) / (high14 - low14);
        if !k.is_finite() {
            return None;
        }
        k_values.push(k);
    }

    let k = k_values[0];
    let d = k_values.iter().sum::<f64>() / d_period as f64;

    if !d.is_finite() {
        return None;
    }

    Some(StochasticResult { k, d })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar {
            instrument: "BTCUSDT".to_string(),
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            is_closed: true,
        }
    }

    #[test]
    fn insufficient_data_returns_none() {
        let bars = vec![bar(101.0, 99.0, 100.0); 5];
        assert!(calculate_stochastic(&bars, 14, 3).is_none());
    }

    #[test]
    fn period_zero_returns_none() {
        let bars = vec![bar(101.0, 99.0, 100.0); 20];
        assert!(calculate_stochastic(&bars, 0, 3).is_none());
    }

    #[test]
    fn close_at_high_yields_k_100() {
        let mut bars = vec![bar(105.0, 95.0, 100.0); 16];
        *bars.last_mut().unwrap() = bar(105.0, 95.0, 105.0);
        let result = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!((result.k - 100.0).abs() < 1e-9);
    }

    #[test]
    fn close_at_low_yields_k_0() {
        let mut bars = vec![bar(105.0, 95.0, 100.0); 16];
        *bars.last_mut().unwrap() = bar(105.0, 95.0, 95.0);
        let result = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!(result.k.abs() < 1e-9);
    }

    #[test]
    fn flat_range_returns_none() {
        let bars = vec![bar(100.0, 100.0, 100.0); 20];
        assert!(calculate_stochastic(&bars, 14, 3).is_none());
    }

    #[test]
    fn d_is_average_of_last_three_k_values() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| {
                let base = 100.0 + i as f64;
                bar(base + 5.0, base - 5.0, base)
            })
            .collect();
        let result = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!(result.d.is_finite());
        assert!((0.0..=100.0).contains(&result.d));
    }
}
