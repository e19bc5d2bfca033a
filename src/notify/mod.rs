// =============================================================================
// Notification Sink — priority-rated operator alerts
// =============================================================================
//
// A structured message (title, key/value details, free text) paired with a
// `Priority`, rate-capped per priority so a misbehaving feed can't page an
// operator into the ground. CRITICAL additionally carries a 24h per-message
// dedup latch so the same underlying fault (e.g. one stuck reconciliation
// mismatch) pages once, not once per retry.
//
// New to this engine — no reference-engine file owns a notification
// concern directly — written in the focused-struct-plus-trait-impl idiom of
// `api/auth.rs`.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::types::Priority;

/// One outbound alert.
#[derive(Debug, Clone)]
pub struct Notification {
    pub priority: Priority,
    pub title: String,
    pub details: Vec<(String, String)>,
    pub body: String,
}

impl Notification {
    pub fn new(priority: Priority, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { priority, title: title.into(), details: Vec::new(), body: body.into() }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    /// A stable key identifying "the same underlying fault" for the
    /// CRITICAL dedup latch. Defaults to the title; callers with a more
    /// specific identity (e.g. an instrument name) should fold it into the
    /// title before constructing the notification.
    fn dedup_key(&self) -> String {
        self.title.clone()
    }
}

fn rate_window(priority: Priority) -> (usize, Duration) {
    match priority {
        Priority::Critical => (6, Duration::from_secs(60 * 60)),
        Priority::Error => (5, Duration::from_secs(60)),
        Priority::Warning => (10, Duration::from_secs(60)),
        Priority::Info => (60, Duration::from_secs(60)),
        Priority::Heartbeat => (24, Duration::from_secs(24 * 60 * 60)),
    }
}

const CRITICAL_DEDUP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

struct PriorityBucket {
    sent_at: Vec<Instant>,
}

impl PriorityBucket {
    fn new() -> Self {
        Self { sent_at: Vec::new() }
    }

    fn allow(&mut self, cap: usize, window: Duration, now: Instant) -> bool {
        self.sent_at.retain(|t| now.duration_since(*t) < window);
        if self.sent_at.len() >= cap {
            return false;
        }
        self.sent_at.push(now);
        true
    }
}

/// Trait a concrete notification backend (Slack, PagerDuty, email...)
/// implements. Out of scope for this crate per §1 — only the rate-capping
/// and dispatch contract live here; `TracingSink` is the one implementation
/// carried, logging at a level matching the priority.
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: &Notification);
}

/// Logs every notification through `tracing` at a level matching its
/// priority. Stands in for a real paging backend in this crate, exactly as
/// the ambient observability surface (§10.5) stands in for a full operator
/// UI: the contract is what matters, not the transport.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn send(&self, n: &Notification) {
        let details = n
            .details
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match n.priority {
            Priority::Critical => error!(details = %details, "{}: {}", n.title, n.body),
            Priority::Error => error!(details = %details, "{}: {}", n.title, n.body),
            Priority::Warning => warn!(details = %details, "{}: {}", n.title, n.body),
            Priority::Info => info!(details = %details, "{}: {}", n.title, n.body),
            Priority::Heartbeat => debug!(details = %details, "{}: {}", n.title, n.body),
        }
    }
}

/// Rate-capping front for any `NotificationSink`. Every call to `notify`
/// first checks the priority's rate cap (and, for CRITICAL, the 24h dedup
/// latch) before forwarding to the underlying sink.
pub struct Notifier {
    sink: Box<dyn NotificationSink>,
    buckets: Mutex<HashMap<&'static str, PriorityBucket>>,
    critical_latch: Mutex<HashMap<String, Instant>>,
}

fn priority_key(p: Priority) -> &'static str {
    match p {
        Priority::Critical => "critical",
        Priority::Error => "error",
        Priority::Warning => "warning",
        Priority::Info => "info",
        Priority::Heartbeat => "heartbeat",
    }
}

impl Notifier {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self { sink, buckets: Mutex::new(HashMap::new()), critical_latch: Mutex::new(HashMap::new()) }
    }

    pub fn with_tracing_sink() -> Self {
        Self::new(Box::new(TracingSink))
    }

    /// Attempt to dispatch `n`. Returns `false` if the message was
    /// suppressed by a rate cap or the CRITICAL dedup latch.
    pub fn notify(&self, n: Notification) -> bool {
        let now = Instant::now();

        if n.priority == Priority::Critical {
            let key = n.dedup_key();
            let mut latch = self.critical_latch.lock();
            if let Some(last) = latch.get(&key) {
                if now.duration_since(*last) < CRITICAL_DEDUP_WINDOW {
                    debug!(title = %n.title, "critical notification suppressed by dedup latch");
                    return false;
                }
            }
            latch.insert(key, now);
        }

        let (cap, window) = rate_window(n.priority);
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(priority_key(n.priority)).or_insert_with(PriorityBucket::new);
        if !bucket.allow(cap, window, now) {
            debug!(priority = priority_key(n.priority), "notification suppressed by rate cap");
            return false;
        }
        drop(buckets);

        self.sink.send(&n);
        true
    }
}
