// =============================================================================
// Composition Root — wires every component together behind one shared handle
// =============================================================================
//
// `AppState` is what the ambient control surface (`api::rest`, `api::ws`)
// reads from and acts on. It owns the `Config`, the `Orchestrator` (which in
// turn owns the decision pipeline and `StateStore`), and a small amount of
// its own bookkeeping for the WebSocket push loop (`state_version`,
// `ws_sequence_number`, connection tracking) — the same shape the reference
// engine's `app_state.rs` used, retargeted from its bespoke snapshot fields
// (VPIN, CVD, regime internals, feature flags) to this engine's actual
// entities: `SystemState`, `Position`, `DecisionRecord`.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Config;
use crate::orchestrator::{DecisionRecord, Orchestrator};
use crate::position::Position;
use crate::state::SystemState;
use crate::types::{AccountMode, TradingMode};

/// Shared application state handed to every Axum handler via `Arc<AppState>`.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    start_time: Instant,

    state_version: AtomicU64,
    pub ws_sequence_number: AtomicU64,
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<Instant>,

    /// Operator-controlled trading mode. Starts `Paused`; §10.5's
    /// pause/resume/kill endpoints mutate this and mirror the effect onto
    /// the orchestrator's SAFE_MODE/HALTED machinery where applicable.
    trading_mode: RwLock<TradingMode>,
    /// Demo vs. Live account mode. Starts `Demo` for safety; an operator
    /// must explicitly switch to `Live`.
    account_mode: RwLock<AccountMode>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            orchestrator,
            start_time: Instant::now(),
            state_version: AtomicU64::new(0),
            ws_sequence_number: AtomicU64::new(0),
            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(Instant::now()),
            trading_mode: RwLock::new(TradingMode::Paused),
            account_mode: RwLock::new(AccountMode::Demo),
        })
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    pub fn trading_mode(&self) -> TradingMode {
        *self.trading_mode.read()
    }

    pub fn set_trading_mode(&self, mode: TradingMode) {
        *self.trading_mode.write() = mode;
        self.increment_version();
    }

    pub fn account_mode(&self) -> AccountMode {
        *self.account_mode.read()
    }

    pub fn set_account_mode(&self, mode: AccountMode) {
        *self.account_mode.write() = mode;
        self.increment_version();
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Assemble the full push/poll snapshot exposed over `/api/v1/state`
    /// and the WebSocket stream.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let system_state = self.orchestrator.state_store().snapshot();
        let open_positions = self.orchestrator.position_manager().get_open_positions();

        StateSnapshot {
            state_version: self.current_state_version(),
            uptime_secs: self.uptime_secs(),
            trading_mode: self.trading_mode(),
            account_mode: self.account_mode(),
            system: system_state,
            open_positions,
        }
    }
}

/// Full state snapshot served by `/api/v1/state` and pushed over the
/// WebSocket stream.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub uptime_secs: u64,
    pub trading_mode: TradingMode,
    pub account_mode: AccountMode,
    pub system: SystemState,
    pub open_positions: Vec<Position>,
}

/// Re-exported so `api::rest` can build the `/api/v1/decisions` response
/// without reaching past `app_state` into `orchestrator` directly.
pub type RecentDecision = DecisionRecord;
