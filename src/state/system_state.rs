// =============================================================================
// SystemState — the single persisted document the orchestrator owns
// =============================================================================
//
// Everything capital is at risk on lives here: lifecycle status, regime,
// equity/drawdown, open positions, adaptive parameters, risk limits, and
// trade counters. The orchestrator is the only writer; every other
// component receives an immutable snapshot for the duration of one
// decision. Persisted as a single JSON document through `KvStore`, written
// atomically after every trade fill, position close, status transition, or
// adaptive-parameter change, mirroring `runtime_config.rs`'s "serialize
// everything, tolerate unknown/missing fields" approach to forward
// compatibility.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::position::Position;
use crate::types::{DirectionalRegime, SystemStatus, VolatilityRegime};

/// TTL applied to the persisted document. Longer is acceptable; this is the
/// spec-documented default.
pub const STATE_TTL_SECS: u64 = 24 * 60 * 60;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Adaptive parameters the orchestrator may retune over time without a
/// restart. Distinct from `Config`, which is fixed for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveParams {
    #[serde(default)]
    pub strategy_weights: HashMap<String, f64>,
    pub stop_atr_multiplier: f64,
    pub activation_threshold: f64,
}

/// Fixed risk limits carried in the persisted document so that a restored
/// process enforces the same caps that were active when it last wrote state,
/// even if `Config`'s env vars later change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskLimits {
    pub daily_loss_limit_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Counters reset at each UTC day boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCounters {
    pub trades_today: u32,
    pub wins_today: u32,
    pub losses_today: u32,
    #[serde(default = "today")]
    pub day: NaiveDate,
}

impl Default for TradeCounters {
    fn default() -> Self {
        Self {
            trades_today: 0,
            wins_today: 0,
            losses_today: 0,
            day: today(),
        }
    }
}

/// The full persisted state of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    #[serde(default)]
    pub status: SystemStatus,
    #[serde(default)]
    pub directional_regime: DirectionalRegime,
    #[serde(default)]
    pub volatility_regime: VolatilityRegime,
    pub equity: f64,
    pub peak_equity: f64,
    #[serde(default)]
    pub current_drawdown_pct: f64,
    #[serde(default)]
    pub daily_pnl: f64,
    #[serde(default)]
    pub daily_pnl_pct: f64,
    /// One open position per instrument, keyed by instrument id. Kept in
    /// sync with `PositionManager`'s live open set by the orchestrator on
    /// every mutation — this field is the durable source of truth, the
    /// manager is the fast in-memory runtime cache used on the decision
    /// path (`check_exits`, `update_price`).
    #[serde(default)]
    pub positions: HashMap<String, Position>,
    pub adaptive: AdaptiveParams,
    pub risk_limits: RiskLimits,
    #[serde(default)]
    pub counters: TradeCounters,
}

impl SystemState {
    pub fn fresh(starting_equity: f64, activation_threshold: f64, stop_atr_multiplier: f64, risk_limits: RiskLimits) -> Self {
        Self {
            status: SystemStatus::Running,
            directional_regime: DirectionalRegime::Unknown,
            volatility_regime: VolatilityRegime::Normal,
            equity: starting_equity,
            peak_equity: starting_equity,
            current_drawdown_pct: 0.0,
            daily_pnl: 0.0,
            daily_pnl_pct: 0.0,
            positions: HashMap::new(),
            adaptive: AdaptiveParams {
                strategy_weights: HashMap::new(),
                stop_atr_multiplier,
                activation_threshold,
            },
            risk_limits,
            counters: TradeCounters::default(),
        }
    }

    /// Recompute `current_drawdown_pct` from a fresh equity mark (realized +
    /// unrealized), raising `peak_equity` if a new high was made. Invariant:
    /// `current_drawdown_pct` is always >= 0.
    pub fn mark_equity(&mut self, equity: f64) {
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown_pct = if self.peak_equity > 0.0 {
            ((self.peak_equity - equity) / self.peak_equity * 100.0).max(0.0)
        } else {
            0.0
        };
    }

    /// Roll daily counters over at the UTC day boundary, resetting
    /// `daily_pnl`/`daily_pnl_pct` and trade counters.
    pub fn roll_daily_counters_if_needed(&mut self) {
        let now = today();
        if self.counters.day != now {
            info!(previous_day = %self.counters.day, new_day = %now, "daily counters reset");
            self.counters = TradeCounters { day: now, ..Default::default() };
            self.daily_pnl = 0.0;
            self.daily_pnl_pct = 0.0;
        }
    }

    /// Record a realized fill's P&L against the day's counters and equity.
    pub fn record_trade_close(&mut self, realized_pnl: f64) {
        self.roll_daily_counters_if_needed();
        self.daily_pnl += realized_pnl;
        self.daily_pnl_pct = if self.equity > 0.0 { self.daily_pnl / self.equity * 100.0 } else { 0.0 };
        self.counters.trades_today += 1;
        if realized_pnl >= 0.0 {
            self.counters.wins_today += 1;
        } else {
            self.counters.losses_today += 1;
        }
    }

    /// Replace the persisted position snapshot with the manager's current
    /// open set. Called by the orchestrator after every position mutation.
    pub fn sync_positions(&mut self, open_positions: &[Position]) {
        self.positions = open_positions
            .iter()
            .map(|p| (p.instrument.clone(), p.clone()))
            .collect();
    }

    pub fn transition_to(&mut self, status: SystemStatus) {
        if self.status != status {
            info!(from = %self.status, to = %status, "system status transition");
            self.status = status;
        }
    }
}

impl StateStore {
    /// Update the current regime fields in memory without forcing a disk
    /// write — recomputed every bar-close, it is too hot a path to persist
    /// on its own; it rides along on the next trade-triggered persist.
    pub fn set_current_regime(&self, directional: DirectionalRegime, volatility: VolatilityRegime) {
        let mut guard = self.inner.write();
        guard.directional_regime = directional;
        guard.volatility_regime = volatility;
    }
}

/// Thread-safe, persistence-aware holder of one `SystemState` document.
/// Composition root (`app_state.rs`) owns one of these; the orchestrator is
/// the only writer.
pub struct StateStore {
    inner: RwLock<SystemState>,
    kv: Arc<dyn crate::state::kv::KvStore>,
    key: String,
}

impl StateStore {
    /// Load from `kv` under `key`, falling back to a fresh state seeded with
    /// `starting_equity` on any load failure (missing key, corrupt JSON).
    /// Per §4.10, a load failure is logged at WARN, never propagated.
    pub async fn load_or_fresh(
        kv: Arc<dyn crate::state::kv::KvStore>,
        key: impl Into<String>,
        starting_equity: f64,
        activation_threshold: f64,
        stop_atr_multiplier: f64,
        risk_limits: RiskLimits,
    ) -> Self {
        let key = key.into();
        let loaded = match kv.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<SystemState>(&raw) {
                Ok(state) => {
                    info!(key = %key, equity = state.equity, status = %state.status, "system state restored");
                    Some(state)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to parse persisted system state, starting fresh");
                    None
                }
            },
            Ok(None) => {
                info!(key = %key, "no persisted system state found, starting fresh");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read persisted system state, starting fresh");
                None
            }
        };

        let state = loaded.unwrap_or_else(|| {
            SystemState::fresh(starting_equity, activation_threshold, stop_atr_multiplier, risk_limits)
        });

        Self { inner: RwLock::new(state), kv, key }
    }

    /// Read-only snapshot for components on the decision path.
    pub fn snapshot(&self) -> SystemState {
        self.inner.read().clone()
    }

    /// Apply `f` to the live state under the write lock, then persist the
    /// result. A persistence failure is retried once; on a second failure
    /// the caller is expected to mark the system DEGRADED (see
    /// `order_manager.rs`/`orchestrator.rs`) and a CRITICAL alert is still
    /// the caller's responsibility, not this store's.
    pub async fn mutate_and_persist<F>(&self, f: F) -> Result<SystemState>
    where
        F: FnOnce(&mut SystemState),
    {
        let snapshot = {
            let mut guard = self.inner.write();
            f(&mut guard);
            guard.clone()
        };
        self.persist(&snapshot).await?;
        Ok(snapshot)
    }

    async fn persist(&self, state: &SystemState) -> Result<()> {
        let payload = serde_json::to_string(state).context("failed to serialize system state")?;
        match self.kv.set(&self.key, &payload, STATE_TTL_SECS).await {
            Ok(()) => Ok(()),
            Err(first_err) => {
                warn!(error = %first_err, "system state persistence failed, retrying once");
                self.kv
                    .set(&self.key, &payload, STATE_TTL_SECS)
                    .await
                    .context("system state persistence failed twice")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::kv::FileKvStore;

    fn risk_limits() -> RiskLimits {
        RiskLimits { daily_loss_limit_pct: 3.0, max_drawdown_pct: 15.0 }
    }

    #[test]
    fn mark_equity_raises_peak_and_tracks_drawdown() {
        let mut state = SystemState::fresh(10_000.0, 0.7, 2.0, risk_limits());
        state.mark_equity(11_000.0);
        assert_eq!(state.peak_equity, 11_000.0);
        assert_eq!(state.current_drawdown_pct, 0.0);

        state.mark_equity(9_350.0);
        assert_eq!(state.peak_equity, 11_000.0);
        assert!((state.current_drawdown_pct - 15.0).abs() < 1e-9);
    }

    #[test]
    fn record_trade_close_updates_daily_pnl_and_counters() {
        let mut state = SystemState::fresh(10_000.0, 0.7, 2.0, risk_limits());
        state.record_trade_close(150.0);
        state.record_trade_close(-50.0);
        assert_eq!(state.daily_pnl, 100.0);
        assert_eq!(state.counters.trades_today, 2);
        assert_eq!(state.counters.wins_today, 1);
        assert_eq!(state.counters.losses_today, 1);
    }

    #[test]
    fn sync_positions_keys_by_instrument() {
        let mut state = SystemState::fresh(10_000.0, 0.7, 2.0, risk_limits());
        let mgr = crate::position::PositionManager::new();
        mgr.open_position(
            "BTCUSDT",
            crate::types::Side::Long,
            100.0,
            1.0,
            95.0,
            110.0,
            "TURTLE_55DAY_BREAKOUT_LONG",
            crate::types::DirectionalRegime::Bull,
        );
        state.sync_positions(&mgr.get_open_positions());
        assert!(state.positions.contains_key("BTCUSDT"));
    }

    #[tokio::test]
    async fn load_or_fresh_falls_back_when_key_missing() {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn crate::state::kv::KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let store = StateStore::load_or_fresh(kv, "system_state", 5_000.0, 0.7, 2.0, risk_limits()).await;
        let snap = store.snapshot();
        assert_eq!(snap.equity, 5_000.0);
        assert_eq!(snap.status, SystemStatus::Running);
    }

    #[tokio::test]
    async fn mutate_and_persist_round_trips_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn crate::state::kv::KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let store = StateStore::load_or_fresh(kv.clone(), "system_state", 10_000.0, 0.7, 2.0, risk_limits()).await;

        store
            .mutate_and_persist(|s| s.transition_to(SystemStatus::Degraded))
            .await
            .unwrap();

        let reloaded = StateStore::load_or_fresh(kv, "system_state", 10_000.0, 0.7, 2.0, risk_limits()).await;
        assert_eq!(reloaded.snapshot().status, SystemStatus::Degraded);
    }
}
