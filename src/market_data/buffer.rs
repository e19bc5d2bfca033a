// =============================================================================
// OHLCV Buffer — per-instrument bounded ring of bar records
// =============================================================================
//
// Adapted from the reference engine's candle ring buffer: a VecDeque-backed
// FIFO capped at a fixed capacity, with in-progress-bar replacement and
// closed-bar append-and-trim. Retyped from `Candle` to `Bar`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use super::bar::Bar;

/// Hard cap on bars retained per instrument.
pub const MAX_BARS: usize = 1000;

/// Minimum closed bars required before any downstream computation begins.
pub const MIN_BARS_FOR_COMPUTE: usize = 50;

/// Bounded FIFO of bars for a single instrument.
pub struct BarBuffer {
    buffers: RwLock<HashMap<String, VecDeque<Bar>>>,
    max_bars: usize,
}

impl BarBuffer {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_bars: MAX_BARS,
        }
    }

    #[cfg(test)]
    fn with_capacity(max_bars: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Append or replace a bar. In-progress bars (`is_closed=false`) replace
    /// the most recent entry if it shares the same open_time and is itself
    /// still in-progress; otherwise a closed bar is appended and the buffer
    /// is trimmed to `max_bars`. Only closed bars are ever permanently kept.
    pub fn update(&self, instrument: &str, bar: Bar) {
        let mut buffers = self.buffers.write();
        let deque = buffers.entry(instrument.to_string()).or_default();

        if !bar.is_closed {
            // In-progress bars are not retained — they exist only to let
            // callers peek at the latest partial price if needed elsewhere.
            return;
        }

        if let Some(last) = deque.back() {
            if last.open_time >= bar.open_time {
                // Duplicate or out-of-order; caller's validator should have
                // already filtered this, but guard defensively.
                return;
            }
        }

        deque.push_back(bar);
        while deque.len() > self.max_bars {
            deque.pop_front();
        }
    }

    /// All closed bars currently retained for `instrument`, oldest first.
    pub fn get_closed(&self, instrument: &str) -> Vec<Bar> {
        self.buffers
            .read()
            .get(instrument)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent `n` closed bars, oldest first.
    pub fn get_last_n(&self, instrument: &str, n: usize) -> Vec<Bar> {
        let all = self.get_closed(instrument);
        if all.len() <= n {
            all
        } else {
            all[all.len() - n..].to_vec()
        }
    }

    pub fn last_close(&self, instrument: &str) -> Option<f64> {
        self.buffers
            .read()
            .get(instrument)
            .and_then(|d| d.back())
            .map(|b| b.close)
    }

    pub fn count(&self, instrument: &str) -> usize {
        self.buffers
            .read()
            .get(instrument)
            .map(|d| d.len())
            .unwrap_or(0)
    }

    /// Whether this instrument has enough history for indicator computation.
    pub fn has_min_history(&self, instrument: &str) -> bool {
        self.count(instrument) >= MIN_BARS_FOR_COMPUTE
    }
}

impl Default for BarBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time: u64, close: f64) -> Bar {
        Bar {
            instrument: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + 60_000,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            is_closed: true,
        }
    }

    #[test]
    fn ring_buffer_trims_to_capacity() {
        let buf = BarBuffer::with_capacity(5);
        for i in 0..10 {
            buf.update("BTCUSDT", bar(i * 1000, i as f64));
        }
        assert_eq!(buf.count("BTCUSDT"), 5);
        let closed = buf.get_closed("BTCUSDT");
        assert_eq!(closed.first().unwrap().close, 5.0);
        assert_eq!(closed.last().unwrap().close, 9.0);
    }

    #[test]
    fn in_progress_bars_are_not_retained() {
        let buf = BarBuffer::new();
        buf.update(
            "BTCUSDT",
            Bar {
                is_closed: false,
                ..bar(1000, 100.0)
            },
        );
        assert_eq!(buf.count("BTCUSDT"), 0);
    }

    #[test]
    fn out_of_order_closed_bar_is_dropped() {
        let buf = BarBuffer::new();
        buf.update("BTCUSDT", bar(2000, 100.0));
        buf.update("BTCUSDT", bar(1000, 50.0));
        assert_eq!(buf.count("BTCUSDT"), 1);
        assert_eq!(buf.last_close("BTCUSDT"), Some(100.0));
    }

    #[test]
    fn last_close_empty_returns_none() {
        let buf = BarBuffer::new();
        assert_eq!(buf.last_close("BTCUSDT"), None);
    }

    #[test]
    fn has_min_history_requires_fifty_bars() {
        let buf = BarBuffer::new();
        for i in 0..49 {
            buf.update("BTCUSDT", bar(i * 1000, i as f64));
        }
        assert!(!buf.has_min_history("BTCUSDT"));
        buf.update("BTCUSDT", bar(49_000, 49.0));
        assert!(buf.has_min_history("BTCUSDT"));
    }

    #[test]
    fn get_last_n_returns_tail() {
        let buf = BarBuffer::new();
        for i in 0..10 {
            buf.update("BTCUSDT", bar(i * 1000, i as f64));
        }
        let last3 = buf.get_last_n("BTCUSDT", 3);
        assert_eq!(last3.len(), 3);
        assert_eq!(last3.last().unwrap().close, 9.0);
    }
}
</content>
