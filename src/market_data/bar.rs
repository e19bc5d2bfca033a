// =============================================================================
// Bar (OHLCV candle) and the raw MarketData wire event
// =============================================================================

use serde::{Deserialize, Serialize};

/// A closed or in-progress OHLCV candle for one instrument/interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub open_time: u64,
    pub close_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Event type carried by the market-data feed, as presented to the core by
/// the ingest adapter regardless of the underlying wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Kline,
    BookTicker,
    AggTrade,
    Depth,
}

/// The normalized shape every ingest adapter must produce, per the venue
/// adapter contract. Fields not relevant to `event_type` are left at default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub instrument: String,
    pub event_type: EventType,
    pub event_time_ms: u64,
    pub received_ms: u64,
    #[serde(default)]
    pub open: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub is_kline_closed: bool,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
}

impl MarketData {
    pub fn into_bar(&self) -> Bar {
        Bar {
            instrument: self.instrument.clone(),
            open_time: self.event_time_ms,
            close_time: self.event_time_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            is_closed: self.is_kline_closed,
        }
    }
}

/// Rejection reason recorded for a bar the validator refused to pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NonFinite,
    HighBelowLow,
    CloseOutOfRange,
    NegativeVolume,
    OutOfOrder,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFinite => write!(f, "non-finite field"),
            Self::HighBelowLow => write!(f, "high < low"),
            Self::CloseOutOfRange => write!(f, "close outside [low, high]"),
            Self::NegativeVolume => write!(f, "negative volume"),
            Self::OutOfOrder => write!(f, "open_time not strictly increasing"),
        }
    }
}

/// Filters malformed or out-of-order bars before any stateful component sees
/// them. Keeps the last accepted closed-bar open-time per instrument so it
/// can reject replays/reorders.
#[derive(Debug, Default)]
pub struct DataValidator {
    last_open_time: std::collections::HashMap<String, u64>,
}

impl DataValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a candidate bar. Returns `(accepted, reason)`. On acceptance
    /// of a closed bar, the last-open-time watermark for the instrument is
    /// advanced; in-progress bars do not advance the watermark.
    pub fn validate(&mut self, bar: &Bar) -> (bool, Option<RejectReason>) {
        if !bar.open.is_finite()
            || !bar.high.is_finite()
            || !bar.low.is_finite()
            || !bar.close.is_finite()
            || !bar.volume.is_finite()
        {
            return (false, Some(RejectReason::NonFinite));
        }
        if bar.high < bar.low {
            return (false, Some(RejectReason::HighBelowLow));
        }
        if bar.close > bar.high || bar.close < bar.low {
            return (false, Some(RejectReason::CloseOutOfRange));
        }
        if bar.volume < 0.0 {
            return (false, Some(RejectReason::NegativeVolume));
        }

        if bar.is_closed {
            if let Some(&last) = self.last_open_time.get(&bar.instrument) {
                if bar.open_time <= last {
                    return (false, Some(RejectReason::OutOfOrder));
                }
            }
            self.last_open_time
                .insert(bar.instrument.clone(), bar.open_time);
        }

        (true, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time: u64, o: f64, h: f64, l: f64, c: f64, v: f64, closed: bool) -> Bar {
        Bar {
            instrument: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + 60_000,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            is_closed: closed,
        }
    }

    #[test]
    fn accepts_well_formed_bar() {
        let mut v = DataValidator::new();
        let (ok, reason) = v.validate(&bar(1000, 100.0, 105.0, 95.0, 102.0, 10.0, true));
        assert!(ok);
        assert!(reason.is_none());
    }

    #[test]
    fn rejects_nan() {
        let mut v = DataValidator::new();
        let (ok, reason) = v.validate(&bar(1000, f64::NAN, 105.0, 95.0, 102.0, 10.0, true));
        assert!(!ok);
        assert_eq!(reason, Some(RejectReason::NonFinite));
    }

    #[test]
    fn rejects_high_below_low() {
        let mut v = DataValidator::new();
        let (ok, reason) = v.validate(&bar(1000, 100.0, 90.0, 95.0, 92.0, 10.0, true));
        assert!(!ok);
        assert_eq!(reason, Some(RejectReason::HighBelowLow));
    }

    #[test]
    fn rejects_close_out_of_range() {
        let mut v = DataValidator::new();
        let (ok, reason) = v.validate(&bar(1000, 100.0, 105.0, 95.0, 110.0, 10.0, true));
        assert!(!ok);
        assert_eq!(reason, Some(RejectReason::CloseOutOfRange));
    }

    #[test]
    fn rejects_negative_volume() {
        let mut v = DataValidator::new();
        let (ok, reason) = v.validate(&bar(1000, 100.0, 105.0, 95.0, 102.0, -1.0, true));
        assert!(!ok);
        assert_eq!(reason, Some(RejectReason::NegativeVolume));
    }

    #[test]
    fn rejects_out_of_order_closed_bar() {
        let mut v = DataValidator::new();
        assert!(v.validate(&bar(2000, 100.0, 105.0, 95.0, 102.0, 10.0, true)).0);
        let (ok, reason) = v.validate(&bar(1500, 100.0, 105.0, 95.0, 102.0, 10.0, true));
        assert!(!ok);
        assert_eq!(reason, Some(RejectReason::OutOfOrder));
    }

    #[test]
    fn in_progress_bar_does_not_advance_watermark() {
        let mut v = DataValidator::new();
        assert!(v.validate(&bar(2000, 100.0, 105.0, 95.0, 102.0, 10.0, false)).0);
        // Same open_time, now closed — still accepted since watermark wasn't advanced.
        assert!(v.validate(&bar(2000, 100.0, 105.0, 95.0, 102.0, 10.0, true)).0);
    }
}
</content>
