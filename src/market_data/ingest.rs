// =============================================================================
// Market Data Ingest — sharded WebSocket adapter
// =============================================================================
//
// Maintains one or more stream connections to the venue, shards instrument
// subscriptions across connections at a fixed per-connection cap, and fans
// incoming events out to registered sinks. Ingest never performs decision-path
// computation — it only validates framing and forwards typed `MarketData`
// events to whichever sinks are registered, each through its own bounded,
// drop-oldest queue so a slow consumer cannot stall the feed.
//
// Grounded on the reference engine's `run_depth_stream`/`run_trade_stream`
// connect-then-read-loop shape, generalized to multiplexed, sharded streams
// with keep-alive and reconnect-with-backoff.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::bar::{EventType, MarketData};

/// Maximum instruments multiplexed onto a single connection before a new
/// shard (and thus a new connection) is opened.
pub const MAX_INSTRUMENTS_PER_CONNECTION: usize = 100;
/// Keep-alive ping cadence.
pub const PING_INTERVAL_SECS: u64 = 30;
/// A connection is considered dead if no pong arrives within this window.
pub const PONG_TIMEOUT_SECS: u64 = 20;
/// Exponential backoff base delay between reconnect attempts.
pub const BACKOFF_BASE_SECS: u64 = 5;
/// Backoff delay cap.
pub const BACKOFF_CAP_SECS: u64 = 60;
/// Consecutive reconnect attempts allowed before escalating to the caller.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Global health degrades once any subscribed instrument has been silent
/// longer than this, independent of any one connection's own state.
pub const FEED_LOSS_SECS: u64 = 30;
/// Earlier warning threshold: an instrument silent past this (but still
/// under `FEED_LOSS_SECS`) degrades the system without forcing SAFE_MODE.
pub const PARTIAL_FEED_LOSS_SECS: u64 = 15;

const SINK_QUEUE_CAPACITY: usize = 256;
const LATENCY_SAMPLE_WINDOW: usize = 1000;

/// Rolling latency statistics over the last `sample_count` (≤ 1000) observed
/// event-time → receipt-time deltas, in milliseconds.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct LatencyMetrics {
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    pub sample_count: usize,
}

/// An alert surfaced through `on_error` sinks: a connection exhausted its
/// reconnect budget, or the feed went silent for an instrument.
#[derive(Debug, Clone)]
pub struct IngestAlert {
    pub message: String,
    /// True when the caller should treat this as grounds for a SAFE_MODE
    /// transition (10 consecutive reconnect failures, or feed loss > 30s).
    pub escalate: bool,
}

/// Split `instruments` into shards of at most `MAX_INSTRUMENTS_PER_CONNECTION`
/// each, preserving order.
pub fn shard_instruments(instruments: &[String]) -> Vec<Vec<String>> {
    instruments
        .chunks(MAX_INSTRUMENTS_PER_CONNECTION)
        .map(|c| c.to_vec())
        .collect()
}

/// Compute `LatencyMetrics` from a slice of millisecond latency samples.
/// Samples need not be sorted; this function sorts a copy.
pub fn compute_latency_metrics(samples: &[u64]) -> LatencyMetrics {
    if samples.is_empty() {
        return LatencyMetrics::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    let avg = sorted.iter().sum::<u64>() as f64 / n as f64;
    let p95 = percentile(&sorted, 0.95);
    let p99 = percentile(&sorted, 0.99);
    let max = *sorted.last().unwrap() as f64;
    LatencyMetrics {
        avg,
        p95,
        p99,
        max,
        sample_count: n,
    }
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)] as f64
}

/// A single registered sink: a bounded, drop-oldest queue drained by a
/// dedicated task that invokes the caller's callback.
struct Fanout<T: Send + 'static> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T: Send + 'static> Fanout<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(SINK_QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    fn push(&self, item: T) {
        let mut q = self.queue.lock();
        if q.len() >= SINK_QUEUE_CAPACITY {
            q.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = total, "sink queue full, dropping oldest event");
        }
        q.push_back(item);
        drop(q);
        self.notify.notify_one();
    }

    fn spawn_drain<F>(self: &Arc<Self>, mut callback: F)
    where
        F: FnMut(T) + Send + 'static,
        T: std::fmt::Debug,
    {
        let fanout = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut q = fanout.queue.lock();
                    q.pop_front()
                };
                match item {
                    Some(item) => callback(item),
                    None => fanout.notify.notified().await,
                }
            }
        });
    }
}

/// Per-instrument last-seen timestamp (ms since epoch), used to derive the
/// "instrument silent > 30s" global health predicate without depending on
/// any one connection's internal state.
struct HealthTracker {
    last_event_ms: RwLock<std::collections::HashMap<String, u64>>,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            last_event_ms: RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn mark(&self, instrument: &str, now_ms: u64) {
        self.last_event_ms.write().insert(instrument.to_string(), now_ms);
    }

    /// Returns the instrument (if any) that has been silent longer than
    /// `FEED_LOSS_SECS`, given the current wall-clock time in ms.
    fn stale_instrument(&self, now_ms: u64) -> Option<String> {
        let map = self.last_event_ms.read();
        map.iter()
            .find(|(_, &last)| now_ms.saturating_sub(last) > FEED_LOSS_SECS * 1_000)
            .map(|(k, _)| k.clone())
    }

    /// Returns the instrument (if any) silent longer than `PARTIAL_FEED_LOSS_SECS`
    /// but not yet past `FEED_LOSS_SECS` — the early-warning window that
    /// degrades the system short of a full feed-loss SAFE_MODE transition.
    fn partially_stale_instrument(&self, now_ms: u64) -> Option<String> {
        let map = self.last_event_ms.read();
        map.iter()
            .find(|(_, &last)| {
                let age_ms = now_ms.saturating_sub(last);
                age_ms > PARTIAL_FEED_LOSS_SECS * 1_000 && age_ms <= FEED_LOSS_SECS * 1_000
            })
            .map(|(k, _)| k.clone())
    }
}

/// Handle to a running ingest adapter. Cloned cheaply (all internal state is
/// behind `Arc`); `subscribe_*` and `on_*` are idempotent / additive.
#[derive(Clone)]
pub struct IngestHandle {
    ws_base_url: Arc<str>,
    kline_sinks: Arc<Fanout<MarketData>>,
    book_ticker_sinks: Arc<Fanout<MarketData>>,
    trade_sinks: Arc<Fanout<MarketData>>,
    error_sinks: Arc<Fanout<IngestAlert>>,
    health: Arc<HealthTracker>,
    latency_samples: Arc<RwLock<VecDeque<u64>>>,
    subscribed_klines: Arc<RwLock<std::collections::HashSet<String>>>,
    subscribed_book_ticker: Arc<RwLock<std::collections::HashSet<String>>>,
}

impl IngestHandle {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: Arc::from(ws_base_url.into().as_str()),
            kline_sinks: Fanout::new(),
            book_ticker_sinks: Fanout::new(),
            trade_sinks: Fanout::new(),
            error_sinks: Fanout::new(),
            health: Arc::new(HealthTracker::new()),
            latency_samples: Arc::new(RwLock::new(VecDeque::with_capacity(LATENCY_SAMPLE_WINDOW))),
            subscribed_klines: Arc::new(RwLock::new(std::collections::HashSet::new())),
            subscribed_book_ticker: Arc::new(RwLock::new(std::collections::HashSet::new())),
        }
    }

    pub fn on_kline<F>(&self, callback: F)
    where
        F: FnMut(MarketData) + Send + 'static,
    {
        self.kline_sinks.spawn_drain(callback);
    }

    pub fn on_book_ticker<F>(&self, callback: F)
    where
        F: FnMut(MarketData) + Send + 'static,
    {
        self.book_ticker_sinks.spawn_drain(callback);
    }

    pub fn on_trade<F>(&self, callback: F)
    where
        F: FnMut(MarketData) + Send + 'static,
    {
        self.trade_sinks.spawn_drain(callback);
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: FnMut(IngestAlert) + Send + 'static,
    {
        self.error_sinks.spawn_drain(callback);
    }

    /// Idempotent: instruments already subscribed for klines are skipped;
    /// only newly-added instruments spawn fresh shard connections.
    pub fn subscribe_klines(&self, instruments: &[String], interval: &str) {
        let mut subscribed = self.subscribed_klines.write();
        let fresh: Vec<String> = instruments
            .iter()
            .filter(|i| subscribed.insert((*i).clone()))
            .cloned()
            .collect();
        drop(subscribed);

        if fresh.is_empty() {
            return;
        }
        for shard in shard_instruments(&fresh) {
            self.spawn_kline_shard(shard, interval.to_string());
        }
    }

    /// Idempotent: see `subscribe_klines`.
    pub fn subscribe_book_ticker(&self, instruments: &[String]) {
        let mut subscribed = self.subscribed_book_ticker.write();
        let fresh: Vec<String> = instruments
            .iter()
            .filter(|i| subscribed.insert((*i).clone()))
            .cloned()
            .collect();
        drop(subscribed);

        if fresh.is_empty() {
            return;
        }
        for shard in shard_instruments(&fresh) {
            self.spawn_book_ticker_shard(shard);
        }
    }

    /// Current rolling latency statistics (event_time_ms → received_ms delta).
    pub fn latency_metrics(&self) -> LatencyMetrics {
        let samples = self.latency_samples.read();
        let v: Vec<u64> = samples.iter().copied().collect();
        compute_latency_metrics(&v)
    }

    /// The instrument (if any) that has gone silent longer than
    /// `FEED_LOSS_SECS`, used by the orchestrator to drive the
    /// RUNNING→DEGRADED / *→SAFE_MODE predicates.
    pub fn stale_instrument(&self, now_ms: u64) -> Option<String> {
        self.health.stale_instrument(now_ms)
    }

    /// The instrument (if any) silent longer than `PARTIAL_FEED_LOSS_SECS`
    /// but short of full feed loss, used by the orchestrator to drive the
    /// RUNNING→DEGRADED predicate ahead of the harder SAFE_MODE one.
    pub fn partially_stale_instrument(&self, now_ms: u64) -> Option<String> {
        self.health.partially_stale_instrument(now_ms)
    }

    fn record_latency(&self, event_time_ms: u64, received_ms: u64) {
        let delta = received_ms.saturating_sub(event_time_ms);
        let mut samples = self.latency_samples.write();
        if samples.len() >= LATENCY_SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back(delta);
    }

    fn spawn_kline_shard(&self, shard: Vec<String>, interval: String) {
        let handle = self.clone();
        tokio::spawn(async move {
            run_shard(handle, shard, StreamKind::Kline(interval)).await;
        });
    }

    fn spawn_book_ticker_shard(&self, shard: Vec<String>) {
        let handle = self.clone();
        tokio::spawn(async move {
            run_shard(handle, shard, StreamKind::BookTicker).await;
        });
    }
}

#[cfg(test)]
impl IngestHandle {
    /// Test-only seam: mark an instrument's last-seen time directly, so
    /// feed-health predicate tests don't need a live WebSocket connection.
    pub fn test_mark_event(&self, instrument: &str, now_ms: u64) {
        self.health.mark(instrument, now_ms);
    }
}

enum StreamKind {
    Kline(String),
    BookTicker,
}

impl StreamKind {
    fn stream_names(&self, instruments: &[String]) -> Vec<String> {
        match self {
            StreamKind::Kline(interval) => instruments
                .iter()
                .map(|i| format!("{}@kline_{interval}", i.to_lowercase()))
                .collect(),
            StreamKind::BookTicker => instruments
                .iter()
                .map(|i| format!("{}@bookTicker", i.to_lowercase()))
                .collect(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StreamKind::Kline(_) => "kline",
            StreamKind::BookTicker => "bookTicker",
        }
    }
}

/// Runs one sharded connection forever, reconnecting with exponential
/// backoff on failure. Escalates via `on_error` once `MAX_RECONNECT_ATTEMPTS`
/// consecutive attempts have failed, then resets the attempt counter and
/// keeps trying (the orchestrator decides whether to stay in SAFE_MODE).
async fn run_shard(handle: IngestHandle, instruments: Vec<String>, kind: StreamKind) {
    let mut attempt: u32 = 0;
    loop {
        match connect_and_read(&handle, &instruments, &kind).await {
            Ok(()) => {
                // Clean disconnect (stream ended); treat as a local failure
                // and reconnect with a fresh backoff schedule.
                attempt = 0;
            }
            Err(e) => {
                attempt += 1;
                warn!(
                    stream = kind.label(),
                    attempt,
                    error = %e,
                    "ingest shard connection failed"
                );
                if attempt >= MAX_RECONNECT_ATTEMPTS {
                    handle.error_sinks.push(IngestAlert {
                        message: format!(
                            "{} shard exhausted {} reconnect attempts: {}",
                            kind.label(),
                            MAX_RECONNECT_ATTEMPTS,
                            e
                        ),
                        escalate: true,
                    });
                    attempt = 0;
                }
            }
        }
        let backoff = backoff_delay(attempt);
        tokio::time::sleep(Duration::from_secs(backoff)).await;
    }
}

fn backoff_delay(attempt: u32) -> u64 {
    if attempt == 0 {
        return BACKOFF_BASE_SECS;
    }
    (BACKOFF_BASE_SECS.saturating_mul(1 << attempt.min(4))).min(BACKOFF_CAP_SECS)
}

async fn connect_and_read(handle: &IngestHandle, instruments: &[String], kind: &StreamKind) -> Result<()> {
    let streams = kind.stream_names(instruments).join("/");
    let url = format!("wss://{}/stream?streams={streams}", handle.ws_base_url);
    info!(url = %url, count = instruments.len(), stream = kind.label(), "connecting ingest shard");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect ingest websocket")?;
    info!(stream = kind.label(), "ingest shard connected");

    let (mut write, mut read) = ws_stream.split();
    let mut ping_ticker = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if last_pong.elapsed() > Duration::from_secs(PING_INTERVAL_SECS + PONG_TIMEOUT_SECS) {
                    return Err(anyhow::anyhow!("no pong received within keep-alive window"));
                }
                write.send(Message::Ping(Vec::new())).await.context("failed to send ping")?;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_combined_stream_message(&text) {
                            handle.record_latency(event.event_time_ms, event.received_ms);
                            handle.health.mark(&event.instrument, event.received_ms);
                            match event.event_type {
                                EventType::Kline => handle.kline_sinks.push(event),
                                EventType::BookTicker => handle.book_ticker_sinks.push(event),
                                EventType::AggTrade => handle.trade_sinks.push(event),
                                EventType::Depth => handle.kline_sinks.push(event),
                            }
                        } else {
                            debug!(stream = kind.label(), "ignoring unparseable ingest frame");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(stream = kind.label(), ?frame, "ingest shard closed by remote");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(e).context("ingest websocket read error");
                    }
                    None => {
                        warn!(stream = kind.label(), "ingest shard stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Parses a Binance-style combined-stream envelope `{"stream":"...","data":{...}}`
/// into a normalized `MarketData` event. Returns `None` for any frame this
/// adapter does not recognize (subscription ACKs, unrelated stream types).
fn parse_combined_stream_message(text: &str) -> Option<MarketData> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let stream = root.get("stream")?.as_str()?;
    let data = root.get("data")?;
    let received_ms = now_ms();

    if stream.contains("@kline_") {
        let k = data.get("k")?;
        let symbol = k.get("s")?.as_str()?.to_string();
        Some(MarketData {
            instrument: symbol,
            event_type: EventType::Kline,
            event_time_ms: data.get("E").and_then(|v| v.as_u64()).unwrap_or(received_ms),
            received_ms,
            open: parse_f64(k.get("o"))?,
            high: parse_f64(k.get("h"))?,
            low: parse_f64(k.get("l"))?,
            close: parse_f64(k.get("c"))?,
            volume: parse_f64(k.get("v"))?,
            is_kline_closed: k.get("x").and_then(|v| v.as_bool()).unwrap_or(false),
            bid: 0.0,
            ask: 0.0,
        })
    } else if stream.contains("@bookTicker") {
        let symbol = data.get("s")?.as_str()?.to_string();
        Some(MarketData {
            instrument: symbol,
            event_type: EventType::BookTicker,
            event_time_ms: received_ms,
            received_ms,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
            is_kline_closed: false,
            bid: parse_f64(data.get("b"))?,
            ask: parse_f64(data.get("a"))?,
        })
    } else {
        None
    }
}

fn parse_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    v?.as_str()?.parse().ok()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_respect_cap() {
        let instruments: Vec<String> = (0..250).map(|i| format!("SYM{i}")).collect();
        let shards = shard_instruments(&instruments);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].len(), 100);
        assert_eq!(shards[1].len(), 100);
        assert_eq!(shards[2].len(), 50);
    }

    #[test]
    fn empty_instruments_produce_no_shards() {
        assert!(shard_instruments(&[]).is_empty());
    }

    #[test]
    fn latency_metrics_on_empty_samples() {
        let m = compute_latency_metrics(&[]);
        assert_eq!(m.sample_count, 0);
        assert_eq!(m.max, 0.0);
    }

    #[test]
    fn latency_metrics_basic() {
        let samples: Vec<u64> = (1..=100).collect();
        let m = compute_latency_metrics(&samples);
        assert_eq!(m.sample_count, 100);
        assert_eq!(m.max, 100.0);
        assert!(m.p95 >= 90.0 && m.p95 <= 100.0);
        assert!(m.p99 >= m.p95);
    }

    #[test]
    fn backoff_escalates_then_caps() {
        assert_eq!(backoff_delay(0), BACKOFF_BASE_SECS);
        assert!(backoff_delay(3) > backoff_delay(1));
        assert_eq!(backoff_delay(10), BACKOFF_CAP_SECS);
    }

    #[test]
    fn parses_kline_envelope() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"E":1000,"k":{"s":"BTCUSDT","o":"100.0","h":"105.0","l":"95.0","c":"102.0","v":"10.0","x":true}}}"#;
        let event = parse_combined_stream_message(text).unwrap();
        assert_eq!(event.instrument, "BTCUSDT");
        assert_eq!(event.event_type, EventType::Kline);
        assert!(event.is_kline_closed);
        assert_eq!(event.close, 102.0);
    }

    #[test]
    fn parses_book_ticker_envelope() {
        let text = r#"{"stream":"btcusdt@bookTicker","data":{"s":"BTCUSDT","b":"99.5","a":"100.5"}}"#;
        let event = parse_combined_stream_message(text).unwrap();
        assert_eq!(event.event_type, EventType::BookTicker);
        assert_eq!(event.bid, 99.5);
        assert_eq!(event.ask, 100.5);
    }

    #[test]
    fn ignores_unrecognized_stream() {
        let text = r#"{"stream":"btcusdt@aggTrade","data":{"p":"1.0"}}"#;
        assert!(parse_combined_stream_message(text).is_none());
    }

    #[test]
    fn health_tracker_flags_stale_instrument() {
        let tracker = HealthTracker::new();
        tracker.mark("BTCUSDT", 1_000);
        assert_eq!(tracker.stale_instrument(1_000 + FEED_LOSS_SECS * 1_000 + 1), Some("BTCUSDT".to_string()));
        assert_eq!(tracker.stale_instrument(1_000), None);
    }

    #[test]
    fn health_tracker_flags_partial_staleness_before_full_loss() {
        let tracker = HealthTracker::new();
        tracker.mark("BTCUSDT", 1_000);
        assert_eq!(tracker.partially_stale_instrument(1_000), None);
        let partial_now = 1_000 + PARTIAL_FEED_LOSS_SECS * 1_000 + 1;
        assert_eq!(tracker.partially_stale_instrument(partial_now), Some("BTCUSDT".to_string()));
        let full_now = 1_000 + FEED_LOSS_SECS * 1_000 + 1;
        assert_eq!(tracker.partially_stale_instrument(full_now), None);
        assert_eq!(tracker.stale_instrument(full_now), Some("BTCUSDT".to_string()));
    }

    #[test]
    fn fanout_drops_oldest_when_full() {
        let fanout = Fanout::<u32>::new();
        for i in 0..(SINK_QUEUE_CAPACITY as u32 + 10) {
            fanout.push(i);
        }
        let q = fanout.queue.lock();
        assert_eq!(q.len(), SINK_QUEUE_CAPACITY);
        assert_eq!(*q.front().unwrap(), 10);
    }
}
