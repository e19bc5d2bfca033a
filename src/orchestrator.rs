// =============================================================================
// Event Orchestrator — drives the decision pipeline and owns SystemState
// =============================================================================
//
// The entry event is "bar closed for instrument X" from ingest. Enforces the
// per-instrument 1s throttle, runs the full feature → regime → rule → veto
// → size → submit → persist pipeline, and drives the status state machine
// (RUNNING/DEGRADED/SAFE_MODE/HALTED).
//
// Grounded on `app_state.rs`'s shared-state aggregation pattern and
// `strategy.rs`'s pipeline-steps-in-sequence shape; the status machine and
// exact transition predicates are new, built directly from the system's
// documented component design rather than adapted from any one reference file.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::indicators::compute_feature_map;
use crate::market_data::bar::{DataValidator, MarketData};
use crate::market_data::buffer::BarBuffer;
use crate::market_data::ingest::{IngestAlert, IngestHandle};
use crate::notify::{Notification, Notifier};
use crate::order_manager::{OrderManager, SubmissionOutcome};
use crate::position::{ExitReason, PositionManager};
use crate::regime::{Regime, RegimeClassifier};
use crate::risk::{evaluate_vetoes, size_position, SizingOutcome, VetoContext};
use crate::rules::engine::{RuleEngine, Signal};
use crate::state::{RiskLimits, StateStore, SystemState};
use crate::types::{Action, Priority, SystemStatus};

/// Per-instrument decisions arriving within this window of the previous
/// accepted one are ignored (replay/duplicate-bar defense).
const THROTTLE_MS: u64 = 1_000;
/// Consecutive venue-call failures before escalating to SAFE_MODE.
const MAX_CONSECUTIVE_VENUE_FAILURES: u32 = 5;
/// Feed silence beyond this triggers SAFE_MODE (mirrors ingest's own
/// `FEED_LOSS_SECS`, checked independently here for the status machine).
const FEED_LOSS_SECS: u64 = 30;
/// How many past pipeline outcomes the ambient control surface can show.
const MAX_RECENT_DECISIONS: usize = 100;
/// A DEGRADED→RUNNING recovery requires every degradation predicate to have
/// been continuously clear for this long, not just on the next health tick.
const DEGRADATION_CLEAR_SUSTAIN_MS: u64 = 60_000;

/// One rule-engine evaluation and its eventual disposition, kept for the
/// ambient control surface's `/api/v1/decisions` endpoint (§10.5). Not
/// persisted — purely an in-memory operational trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub instrument: String,
    pub action: Action,
    pub bias: f64,
    pub confidence: f64,
    pub contributing_rules: Vec<String>,
    pub regime: Regime,
    pub outcome: String,
    pub timestamp_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as u64
}

pub struct Orchestrator {
    config: Arc<Config>,
    buffer: Arc<BarBuffer>,
    validator: RwLock<DataValidator>,
    regime: Arc<RegimeClassifier>,
    state: Arc<StateStore>,
    positions: Arc<PositionManager>,
    order_manager: Arc<OrderManager>,
    ingest: IngestHandle,
    notifier: Arc<Notifier>,
    last_decision_ms: RwLock<HashMap<String, u64>>,
    consecutive_venue_failures: AtomicU32,
    recent_decisions: RwLock<VecDeque<DecisionRecord>>,
    /// ms timestamp of the most recent fill whose slippage breached
    /// `max_slippage_pct`; 0 means no breach has been recorded.
    last_slippage_breach_ms: AtomicU64,
    /// ms timestamp at which the combined degradation predicate (latency,
    /// slippage, partial feed loss) was last observed true. Seeded to
    /// construction time so a DEGRADED status set for another reason (e.g.
    /// persistence failure) isn't immediately cleared by a stale zero value.
    degradation_last_true_ms: AtomicU64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        buffer: Arc<BarBuffer>,
        regime: Arc<RegimeClassifier>,
        state: Arc<StateStore>,
        positions: Arc<PositionManager>,
        order_manager: Arc<OrderManager>,
        ingest: IngestHandle,
        notifier: Arc<Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            buffer,
            validator: RwLock::new(DataValidator::new()),
            regime,
            state,
            positions,
            order_manager,
            ingest,
            notifier,
            last_decision_ms: RwLock::new(HashMap::new()),
            consecutive_venue_failures: AtomicU32::new(0),
            recent_decisions: RwLock::new(VecDeque::with_capacity(MAX_RECENT_DECISIONS)),
            last_slippage_breach_ms: AtomicU64::new(0),
            degradation_last_true_ms: AtomicU64::new(now_ms()),
        })
    }

    /// Register the ingest kline sink and spawn the task that drains it,
    /// running the decision pipeline on every accepted bar-close.
    pub fn spawn_ingest_consumer(self: &Arc<Self>) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<MarketData>(1024);
        self.ingest.on_kline(move |md| {
            if tx.try_send(md).is_err() {
                warn!("orchestrator ingest channel full, dropping kline event");
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(md) = rx.recv().await {
                this.handle_market_data(md).await;
            }
        });

        self.spawn_ingest_error_consumer();
    }

    /// Register the ingest error sink and spawn the task that escalates
    /// `escalate: true` alerts — reconnect-budget exhaustion or full feed
    /// loss reported by ingest itself — straight to SAFE_MODE.
    fn spawn_ingest_error_consumer(self: &Arc<Self>) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<IngestAlert>(64);
        self.ingest.on_error(move |alert| {
            if tx.try_send(alert).is_err() {
                warn!("orchestrator ingest error channel full, dropping alert");
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if alert.escalate {
                    this.transition_to_safe_mode(&alert.message).await;
                } else {
                    warn!(message = %alert.message, "ingest alert (non-escalating)");
                }
            }
        });
    }

    async fn handle_market_data(&self, md: MarketData) {
        if !md.is_kline_closed {
            return;
        }
        let bar = md.into_bar();
        let (accepted, reason) = {
            let mut validator = self.validator.write();
            validator.validate(&bar)
        };
        if !accepted {
            tracing::debug!(instrument = %bar.instrument, reason = ?reason, "bar rejected by validator");
            return;
        }

        let instrument = bar.instrument.clone();
        let close = bar.close;
        self.buffer.update(&instrument, bar);
        self.positions.update_price(&instrument, close);
        self.on_bar_close(&instrument, close).await;
    }

    /// Full pipeline for one accepted bar-close: throttle, status gate,
    /// exit check, feature/regime/rule/veto/size/submit for a fresh entry.
    async fn on_bar_close(&self, instrument: &str, close_price: f64) {
        if self.is_throttled(instrument) {
            return;
        }

        let status = self.state.snapshot().status;
        if matches!(status, SystemStatus::SafeMode | SystemStatus::Halted) {
            return;
        }

        if self.handle_exits(instrument, close_price).await {
            // A position on this instrument closed this bar; skip opening a
            // new one in the same decision to avoid flip-flopping.
            return;
        }

        if !self.buffer.has_min_history(instrument) {
            return;
        }
        let bars = self.buffer.get_closed(instrument);
        let Some(features) = compute_feature_map(instrument, &bars) else {
            return;
        };

        let regime = self.regime.update(instrument, &features);
        self.state.set_current_regime(regime.directional, regime.volatility);

        let snapshot = self.state.snapshot();
        let signal = RuleEngine::evaluate(
            instrument,
            &features,
            regime,
            &snapshot.adaptive.strategy_weights,
            snapshot.adaptive.activation_threshold,
        );

        if !matches!(signal.action, Action::ProposeLong | Action::ProposeShort) {
            return;
        }
        if snapshot.positions.contains_key(instrument) {
            return;
        }

        let atr = signal.atr_snapshot.unwrap_or(0.0);
        let sizing = size_position(
            snapshot.equity,
            signal.suggested_price,
            atr,
            self.config.risk_per_trade_pct / 100.0,
            snapshot.adaptive.stop_atr_multiplier,
            self.config.min_position_notional,
            self.config.max_position_notional,
            0.001,
        );

        let (quantity, _notional) = match sizing {
            SizingOutcome::Rejected { reason } => {
                info!(instrument, reason, "sizing rejected");
                self.record_decision(&signal, format!("sizing rejected: {reason}"));
                self.notifier.notify(Notification::new(Priority::Info, "position sizing rejected", reason).with_detail("instrument", instrument));
                return;
            }
            SizingOutcome::Sized { quantity, notional } => (quantity, notional),
        };

        let veto_ctx = VetoContext {
            instrument,
            proposed_quantity: quantity,
            proposed_price: signal.suggested_price,
            open_position_count: snapshot.positions.len(),
            max_positions: self.config.max_positions,
            max_position_size: self.config.max_position_size,
            current_drawdown_pct: snapshot.current_drawdown_pct,
            max_drawdown_pct: snapshot.risk_limits.max_drawdown_pct,
            daily_pnl_pct: snapshot.daily_pnl_pct,
            daily_loss_limit_pct: snapshot.risk_limits.daily_loss_limit_pct,
        };
        let veto = evaluate_vetoes(&veto_ctx);
        if !veto.passed {
            let stage = veto.stage.map(|s| s.to_string()).unwrap_or_default();
            let reason = veto.reason.clone().unwrap_or_default();
            warn!(instrument, stage, reason, "trade proposal vetoed");
            self.record_decision(&signal, format!("vetoed at {stage}: {reason}"));
            self.notifier.notify(
                Notification::new(Priority::Warning, "trade vetoed", reason)
                    .with_detail("instrument", instrument)
                    .with_detail("stage", stage),
            );
            return;
        }
        let final_quantity = veto.adjusted_quantity.unwrap_or(quantity);

        match self.order_manager.submit_entry(&signal, final_quantity, snapshot.adaptive.stop_atr_multiplier).await {
            Ok(SubmissionOutcome::Filled { position_id, fill_price, quantity, slippage_breach_pct }) => {
                self.consecutive_venue_failures.store(0, Ordering::Relaxed);
                info!(instrument, position_id, fill_price, quantity, side = %signal.action, "entry filled");
                self.record_decision(&signal, format!("filled at {fill_price:.4} (position {position_id})"));
                if let Some(deviation_pct) = slippage_breach_pct {
                    self.record_slippage_breach(instrument, deviation_pct);
                }
                self.persist_positions().await;
            }
            Ok(SubmissionOutcome::VenueRejected { reason }) => {
                warn!(instrument, reason, "venue rejected entry order");
                self.record_decision(&signal, format!("venue rejected: {reason}"));
                self.notifier.notify(Notification::new(Priority::Error, "order rejected by venue", reason).with_detail("instrument", instrument));
            }
            Ok(SubmissionOutcome::VenueTransient { reason }) => {
                self.record_decision(&signal, format!("venue transient failure: {reason}"));
                self.record_venue_failure(&reason).await;
            }
            Ok(SubmissionOutcome::VenueAuthFailure { reason }) => {
                self.record_decision(&signal, format!("venue authentication failure: {reason}"));
                self.transition_to_safe_mode(&format!("venue authentication failure: {reason}")).await;
            }
            Err(e) => {
                self.record_decision(&signal, format!("venue call errored: {e}"));
                self.record_venue_failure(&e.to_string()).await;
            }
        }
    }

    /// Append one pipeline outcome to the bounded operational trail,
    /// dropping the oldest entry once `MAX_RECENT_DECISIONS` is reached.
    fn record_decision(&self, signal: &Signal, outcome: impl Into<String>) {
        let mut log = self.recent_decisions.write();
        if log.len() >= MAX_RECENT_DECISIONS {
            log.pop_front();
        }
        log.push_back(DecisionRecord {
            instrument: signal.instrument.clone(),
            action: signal.action,
            bias: signal.bias,
            confidence: signal.confidence,
            contributing_rules: signal.contributing_rules.clone(),
            regime: signal.regime,
            outcome: outcome.into(),
            timestamp_ms: now_ms(),
        });
    }

    /// Most recent pipeline outcomes, newest last.
    pub fn recent_decisions(&self) -> Vec<DecisionRecord> {
        self.recent_decisions.read().iter().cloned().collect()
    }

    /// Check for stop-loss/take-profit exits on `instrument` and submit a
    /// close for each. Returns true if a position was closed this bar.
    async fn handle_exits(&self, instrument: &str, close_price: f64) -> bool {
        let exits: Vec<_> = self
            .positions
            .check_exits()
            .into_iter()
            .filter(|(id, _)| self.positions.get_open_position_for(instrument).map(|p| &p.id == id).unwrap_or(false))
            .collect();

        let mut closed_any = false;
        for (_, reason) in exits {
            match self.order_manager.submit_close(instrument, reason, close_price).await {
                Ok(Some(pnl)) => {
                    closed_any = true;
                    self.mutate_and_persist(|s| s.record_trade_close(pnl)).await;
                    self.persist_positions().await;
                    info!(instrument, reason = %reason, pnl, "position closed on exit");
                }
                Ok(None) => {}
                Err(e) => warn!(instrument, error = %e, "failed to submit close order"),
            }
        }
        closed_any
    }

    fn is_throttled(&self, instrument: &str) -> bool {
        let now = now_ms();
        let mut last = self.last_decision_ms.write();
        if let Some(&prev) = last.get(instrument) {
            if now.saturating_sub(prev) < THROTTLE_MS {
                return true;
            }
        }
        last.insert(instrument.to_string(), now);
        false
    }

    async fn persist_positions(&self) {
        let open = self.positions.get_open_positions();
        self.mutate_and_persist(|s| s.sync_positions(&open)).await;
    }

    /// Apply `f` to `SystemState` and persist it, per §4.10. A persistence
    /// failure is already retried once inside `StateStore::persist`; if it
    /// still fails, §7's `PersistenceFailure` policy applies here: mark the
    /// system DEGRADED (unless a worse status is already active) and raise a
    /// CRITICAL alert. The in-memory mutation always took effect regardless
    /// of whether the write-through succeeded.
    async fn mutate_and_persist<F>(&self, f: F) -> SystemState
    where
        F: FnOnce(&mut SystemState),
    {
        match self.state.mutate_and_persist(f).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "system state persistence failed twice");
                self.notifier.notify(Notification::new(
                    Priority::Critical,
                    "state persistence failed",
                    e.to_string(),
                ));
                let current = self.state.snapshot();
                if matches!(current.status, SystemStatus::Running) {
                    let _ = self.state.mutate_and_persist(|s| s.transition_to(SystemStatus::Degraded)).await;
                }
                self.state.snapshot()
            }
        }
    }

    async fn record_venue_failure(&self, reason: &str) {
        let failures = self.consecutive_venue_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(failures, reason, "venue call failed");
        if failures >= MAX_CONSECUTIVE_VENUE_FAILURES {
            self.transition_to_safe_mode(&format!("{failures} consecutive venue failures: {reason}")).await;
        }
    }

    /// Records a fill's slippage breach so the next health tick's combined
    /// degradation predicate picks it up (RUNNING → DEGRADED).
    fn record_slippage_breach(&self, instrument: &str, deviation_pct: f64) {
        self.last_slippage_breach_ms.store(now_ms(), Ordering::Relaxed);
        warn!(instrument, deviation_pct, "fill slippage breach recorded, will degrade on next health tick");
    }

    async fn transition_to_safe_mode(&self, reason: &str) {
        self.mutate_and_persist(|s| s.transition_to(SystemStatus::SafeMode)).await;
        self.notifier.notify(Notification::new(Priority::Critical, "system entered SAFE_MODE", reason.to_string()));
        self.reconcile_with_venue().await;
    }

    /// Periodic health tick: feed-loss and risk-limit checks that drive the
    /// status machine independent of any one bar-close. Intended to be
    /// called on a short interval (e.g. every few seconds) from `main`.
    pub async fn run_health_tick(&self) {
        let snapshot = self.state.snapshot();
        if matches!(snapshot.status, SystemStatus::Halted) {
            return;
        }

        if snapshot.current_drawdown_pct >= snapshot.risk_limits.max_drawdown_pct {
            self.halt(&format!("drawdown {:.2}% reached limit {:.2}%", snapshot.current_drawdown_pct, snapshot.risk_limits.max_drawdown_pct))
                .await;
            return;
        }
        if snapshot.daily_pnl_pct <= -snapshot.risk_limits.daily_loss_limit_pct {
            self.halt(&format!("daily P&L {:.2}% reached loss limit {:.2}%", snapshot.daily_pnl_pct, snapshot.risk_limits.daily_loss_limit_pct))
                .await;
            return;
        }

        if matches!(snapshot.status, SystemStatus::SafeMode) {
            return;
        }

        if let Some(stale) = self.ingest.stale_instrument(now_ms()) {
            self.transition_to_safe_mode(&format!("feed loss: {stale} silent for more than {FEED_LOSS_SECS}s")).await;
            return;
        }

        self.evaluate_degradation(&snapshot).await;
    }

    /// Combined RUNNING↔DEGRADED predicate: latency p95 > 2x average, a
    /// recent fill slippage breach, or an instrument silent short of full
    /// feed loss. Recovery to RUNNING requires every predicate to have been
    /// continuously clear for `DEGRADATION_CLEAR_SUSTAIN_MS`, not just the
    /// current tick.
    async fn evaluate_degradation(&self, snapshot: &SystemState) {
        let now = now_ms();
        let latency = self.ingest.latency_metrics();
        let latency_degraded = latency.sample_count > 0 && latency.avg > 0.0 && latency.p95 > latency.avg * 2.0;

        let last_breach = self.last_slippage_breach_ms.load(Ordering::Relaxed);
        let slippage_degraded = last_breach != 0 && now.saturating_sub(last_breach) < DEGRADATION_CLEAR_SUSTAIN_MS;

        let partial_feed_loss = self.ingest.partially_stale_instrument(now);
        let feed_degraded = partial_feed_loss.is_some();

        let degraded_now = latency_degraded || slippage_degraded || feed_degraded;

        if degraded_now {
            self.degradation_last_true_ms.store(now, Ordering::Relaxed);
            if matches!(snapshot.status, SystemStatus::Running) {
                let reason = if latency_degraded {
                    "latency p95 exceeds 2x average".to_string()
                } else if slippage_degraded {
                    "recent fill slippage breach".to_string()
                } else {
                    format!("instrument {} feed degraded", partial_feed_loss.unwrap_or_default())
                };
                info!(reason, "RUNNING -> DEGRADED");
                self.mutate_and_persist(|s| s.transition_to(SystemStatus::Degraded)).await;
                self.reconcile_with_venue().await;
            }
        } else if matches!(snapshot.status, SystemStatus::Degraded) {
            let last_true = self.degradation_last_true_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last_true) >= DEGRADATION_CLEAR_SUSTAIN_MS {
                info!("degradation predicates clear for sustain window, DEGRADED -> RUNNING");
                self.mutate_and_persist(|s| s.transition_to(SystemStatus::Running)).await;
                self.reconcile_with_venue().await;
            }
        }
    }

    /// Explicit kill-switch or risk-driven halt: transitions to HALTED and
    /// closes every open position at its last known price.
    pub async fn halt(&self, reason: &str) {
        warn!(reason, "halting system and closing all open positions");
        self.mutate_and_persist(|s| s.transition_to(SystemStatus::Halted)).await;
        self.notifier.notify(Notification::new(Priority::Critical, "system HALTED", reason.to_string()));
        self.reconcile_with_venue().await;

        for pos in self.positions.get_open_positions() {
            match self.order_manager.submit_close(&pos.instrument, ExitReason::Manual, pos.current_price).await {
                Ok(Some(pnl)) => {
                    self.mutate_and_persist(|s| s.record_trade_close(pnl)).await;
                }
                Ok(None) => {}
                Err(e) => warn!(instrument = %pos.instrument, error = %e, "failed to close position during halt"),
            }
        }
        self.persist_positions().await;
    }

    /// Operator-triggered recovery from SAFE_MODE/HALTED back to RUNNING.
    pub async fn resume(&self) {
        self.mutate_and_persist(|s| s.transition_to(SystemStatus::Running)).await;
        self.consecutive_venue_failures.store(0, Ordering::Relaxed);
        info!("system resumed to RUNNING by operator");
        self.reconcile_with_venue().await;
    }

    /// Reconcile local positions against the venue. Called on startup and
    /// on every status-transition event (`transition_to_safe_mode`, `halt`,
    /// `resume`, and the DEGRADED/RUNNING toggles in `run_health_tick`).
    ///
    /// On reconciliation failure this sets SAFE_MODE directly rather than
    /// through `transition_to_safe_mode`, which would call back into this
    /// method and recurse on a persistently unreachable venue.
    pub async fn reconcile_with_venue(&self) {
        match self.order_manager.reconcile().await {
            Ok(report) if report.resolved_by_adopting_venue => {
                self.notifier.notify(
                    Notification::new(
                        Priority::Critical,
                        "reconciliation mismatch",
                        format!("adopted venue view for: {}", report.mismatched_instruments.join(", ")),
                    ),
                );
                self.persist_positions().await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "reconciliation pass failed");
                // Never downgrade an already-HALTED system back to SAFE_MODE;
                // HALTED only clears through an operator-triggered `resume`.
                if !matches!(self.state.snapshot().status, SystemStatus::Halted) {
                    self.mutate_and_persist(|s| s.transition_to(SystemStatus::SafeMode)).await;
                    self.notifier.notify(Notification::new(
                        Priority::Critical,
                        "system entered SAFE_MODE",
                        format!("reconciliation failed: {e}"),
                    ));
                }
            }
        }
    }

    /// Drain in-flight work and persist final state on shutdown.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down, persisting final state");
        self.persist_positions().await;
    }

    pub fn risk_limits_from_config(config: &Config) -> RiskLimits {
        RiskLimits { daily_loss_limit_pct: config.daily_loss_limit_pct, max_drawdown_pct: config.max_drawdown_pct }
    }

    pub fn state_store(&self) -> Arc<StateStore> {
        Arc::clone(&self.state)
    }

    pub fn position_manager(&self) -> Arc<PositionManager> {
        Arc::clone(&self.positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::state::kv::FileKvStore;
    use crate::venue::binance_futures::BinanceFuturesClient;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            environment: Environment::DryRun,
            instruments: vec!["BTCUSDT".to_string()],
            max_positions: 5,
            max_position_size: 1000.0,
            activation_threshold: 0.7,
            stop_atr_multiplier: 2.0,
            max_drawdown_pct: 15.0,
            daily_loss_limit_pct: 3.0,
            max_slippage_pct: 0.1,
            leverage: 3,
            risk_per_trade_pct: 1.0,
            min_position_notional: 5.0,
            max_position_notional: 1000.0,
            starting_equity: 10_000.0,
            api_key: String::new(),
            api_secret: String::new(),
            admin_token: String::new(),
            bind_addr: "0.0.0.0:3001".to_string(),
            state_key: "system_state".to_string(),
        })
    }

    async fn test_orchestrator() -> (Arc<Orchestrator>, tempfile::TempDir) {
        let config = test_config();
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn crate::state::kv::KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let risk_limits = Orchestrator::risk_limits_from_config(&config);
        let state = Arc::new(
            StateStore::load_or_fresh(
                kv,
                config.state_key.clone(),
                config.starting_equity,
                config.activation_threshold,
                config.stop_atr_multiplier,
                risk_limits,
            )
            .await,
        );
        let positions = Arc::new(PositionManager::new());
        let venue = Arc::new(BinanceFuturesClient::with_base_url("key", "secret", "https://example.invalid"));
        let order_manager = Arc::new(OrderManager::new(venue, positions.clone(), true, config.max_slippage_pct));
        let buffer = Arc::new(BarBuffer::new());
        let regime = Arc::new(RegimeClassifier::new());
        let ingest = IngestHandle::new("stream.binancefuture.com");
        let notifier = Arc::new(Notifier::with_tracing_sink());

        let orch = Orchestrator::new(config, buffer, regime, state, positions, order_manager, ingest, notifier);
        (orch, dir)
    }

    fn test_signal() -> Signal {
        Signal {
            instrument: "BTCUSDT".to_string(),
            action: Action::ProposeLong,
            bias: 0.9,
            confidence: 1.0,
            contributing_rules: vec!["TURTLE_55DAY_BREAKOUT_LONG".to_string()],
            regime: Regime {
                directional: crate::types::DirectionalRegime::Bull,
                volatility: crate::types::VolatilityRegime::Normal,
            },
            atr_snapshot: Some(0.5),
            suggested_price: 100.0,
        }
    }

    #[tokio::test]
    async fn is_throttled_blocks_within_window_then_allows_after() {
        let (orch, _dir) = test_orchestrator().await;
        assert!(!orch.is_throttled("BTCUSDT"), "first call for an instrument is never throttled");
        assert!(orch.is_throttled("BTCUSDT"), "second call inside THROTTLE_MS is throttled");

        // A different instrument is tracked independently.
        assert!(!orch.is_throttled("ETHUSDT"));
    }

    #[tokio::test]
    async fn record_decision_caps_length_and_keeps_newest() {
        let (orch, _dir) = test_orchestrator().await;
        let signal = test_signal();
        for i in 0..(MAX_RECENT_DECISIONS + 5) {
            orch.record_decision(&signal, format!("outcome {i}"));
        }
        let recent = orch.recent_decisions();
        assert_eq!(recent.len(), MAX_RECENT_DECISIONS);
        assert_eq!(recent.last().unwrap().outcome, format!("outcome {}", MAX_RECENT_DECISIONS + 4));
        assert_eq!(recent.first().unwrap().outcome, "outcome 5");
    }

    #[tokio::test]
    async fn health_tick_halts_on_drawdown_breach() {
        let (orch, _dir) = test_orchestrator().await;
        orch.state_store().mutate_and_persist(|s| s.mark_equity(8_000.0)).await.unwrap();
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Halted);
    }

    #[tokio::test]
    async fn health_tick_halts_on_daily_loss_breach() {
        let (orch, _dir) = test_orchestrator().await;
        orch.state_store().mutate_and_persist(|s| s.record_trade_close(-400.0)).await.unwrap();
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Halted);
    }

    #[tokio::test]
    async fn health_tick_enters_safe_mode_on_full_feed_loss() {
        let (orch, _dir) = test_orchestrator().await;
        let now = now_ms();
        orch.ingest.test_mark_event("BTCUSDT", now - (FEED_LOSS_SECS + 1) * 1_000);
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::SafeMode);
    }

    #[tokio::test]
    async fn health_tick_degrades_on_partial_feed_loss_under_30s() {
        let (orch, _dir) = test_orchestrator().await;
        let now = now_ms();
        // Silent for 20s: past the partial-loss threshold, short of full feed loss.
        orch.ingest.test_mark_event("BTCUSDT", now - 20_000);
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Degraded);
    }

    #[tokio::test]
    async fn health_tick_degrades_on_recent_slippage_breach() {
        let (orch, _dir) = test_orchestrator().await;
        orch.record_slippage_breach("BTCUSDT", 5.0);
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Degraded);
    }

    #[tokio::test]
    async fn degraded_recovers_to_running_only_after_sustained_clear() {
        let (orch, _dir) = test_orchestrator().await;
        orch.record_slippage_breach("BTCUSDT", 5.0);
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Degraded);

        // Predicate itself clears, but the sustain window hasn't elapsed yet.
        orch.last_slippage_breach_ms.store(0, Ordering::Relaxed);
        orch.run_health_tick().await;
        assert_eq!(
            orch.state_store().snapshot().status,
            SystemStatus::Degraded,
            "must not recover to RUNNING before the predicate has been clear for DEGRADATION_CLEAR_SUSTAIN_MS"
        );

        // Backdate the last-true timestamp past the sustain window.
        orch.degradation_last_true_ms.store(now_ms() - DEGRADATION_CLEAR_SUSTAIN_MS - 1, Ordering::Relaxed);
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Running);
    }

    #[tokio::test]
    async fn halted_system_ignores_health_tick() {
        let (orch, _dir) = test_orchestrator().await;
        orch.halt("operator kill-switch").await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Halted);

        // A feed loss after HALTED must not change status; halt() is terminal
        // until an operator calls `resume`.
        let now = now_ms();
        orch.ingest.test_mark_event("BTCUSDT", now - (FEED_LOSS_SECS + 1) * 1_000);
        orch.run_health_tick().await;
        assert_eq!(orch.state_store().snapshot().status, SystemStatus::Halted);
    }
}
