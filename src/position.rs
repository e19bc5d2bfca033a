// =============================================================================
// Position — state tracking for open and closed trades
// =============================================================================
//
// Grounded on the reference engine's `position_engine.rs`: the RwLock-guarded
// open/closed vector split, UUID identity, and tracing on every mutation are
// kept. The TP1/TP2 partial-close ladder and trailing-stop mechanics are
// dropped — a position here carries a single stop-loss/take-profit pair,
// closed in full on either hit.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::types::{DirectionalRegime, Side};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: PositionStatus,
    pub strategy: String,
    #[serde(default)]
    pub regime_at_entry: DirectionalRegime,
    pub opened_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub realized_pnl: f64,
}

impl Position {
    fn direction(&self) -> f64 {
        match self.side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// Reason an open position is exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TakeProfit => write!(f, "take_profit"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Thread-safe manager owning the open and closed position lists.
pub struct PositionManager {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        instrument: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
        strategy: &str,
        regime_at_entry: DirectionalRegime,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let pos = Position {
            id: id.clone(),
            instrument: instrument.to_string(),
            side,
            entry_price,
            quantity,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            stop_loss,
            take_profit,
            status: PositionStatus::Open,
            strategy: strategy.to_string(),
            regime_at_entry,
            opened_at: now,
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
        };

        info!(
            id = %id,
            instrument,
            side = %side,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            strategy,
            regime_at_entry = %regime_at_entry,
            "position opened"
        );

        self.open.write().push(pos);
        id
    }

    /// Update `current_price` and unrealized PnL for every open position on
    /// `instrument`.
    pub fn update_price(&self, instrument: &str, current_price: f64) {
        let mut positions = self.open.write();
        for pos in positions.iter_mut().filter(|p| p.instrument == instrument) {
            pos.current_price = current_price;
            pos.unrealized_pnl = pos.direction() * (current_price - pos.entry_price) * pos.quantity;
        }
    }

    /// Scan open positions for a stop-loss or take-profit hit. Does not
    /// mutate state — the caller closes via `close_position`.
    pub fn check_exits(&self) -> Vec<(String, ExitReason)> {
        let positions = self.open.read();
        positions
            .iter()
            .filter_map(|pos| {
                let is_long = pos.side == Side::Long;
                let price = pos.current_price;

                let sl_hit = if is_long {
                    price <= pos.stop_loss
                } else {
                    price >= pos.stop_loss
                };
                if sl_hit {
                    return Some((pos.id.clone(), ExitReason::StopLoss));
                }

                let tp_hit = if is_long {
                    price >= pos.take_profit
                } else {
                    price <= pos.take_profit
                };
                if tp_hit {
                    return Some((pos.id.clone(), ExitReason::TakeProfit));
                }

                None
            })
            .collect()
    }

    /// Close a position by id at `close_price`, moving it to the closed list.
    /// Returns the realized PnL, or `None` if no such open position exists.
    pub fn close_position(&self, id: &str, reason: ExitReason, close_price: f64) -> Option<f64> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.id == id)?;
        let mut pos = open.remove(idx);

        let pnl = pos.direction() * (close_price - pos.entry_price) * pos.quantity;
        pos.realized_pnl = pnl;
        pos.current_price = close_price;
        pos.unrealized_pnl = 0.0;
        pos.status = PositionStatus::Closed;
        pos.closed_at = Some(Utc::now().to_rfc3339());
        pos.close_reason = Some(reason.to_string());

        info!(id, reason = %reason, close_price, realized_pnl = pnl, "position closed");

        self.closed.write().push(pos);
        Some(pnl)
    }

    pub fn get_open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn get_open_position_for(&self, instrument: &str) -> Option<Position> {
        self.open.read().iter().find(|p| p.instrument == instrument).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    pub fn get_closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("open_positions", &self.open.read().len())
            .field("closed_positions", &self.closed.read().len())
            .finish()
    }
}
