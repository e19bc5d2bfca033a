// =============================================================================
// Pre-Trade Veto Chain
// =============================================================================
//
// An ordered, short-circuiting sequence of five checks a proposed trade must
// clear before it reaches the order manager. Earlier stages can fail fast
// without evaluating later ones; a stage may also pass the trade through with
// an adjusted quantity/price rather than vetoing it outright.
//
// Grounded on the reference engine's `risk.rs` circuit-breaker gate (the
// drawdown and daily-loss checks survive nearly unchanged); `max_positions`
// and `position_size` are new, sized-trade-aware stages; `correlation` is
// carried as an explicit placeholder stage that never fires (see DESIGN.md
// Open Question (b)) so the chain's shape already matches what a future
// correlation check would slot into.

use serde::{Deserialize, Serialize};

use crate::types::VetoStage;

/// Inputs the veto chain needs to evaluate one proposed trade.
pub struct VetoContext<'a> {
    pub instrument: &'a str,
    pub proposed_quantity: f64,
    pub proposed_price: f64,
    pub open_position_count: usize,
    pub max_positions: usize,
    pub max_position_size: f64,
    pub current_drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub daily_pnl_pct: f64,
    pub daily_loss_limit_pct: f64,
}

/// The outcome of running the chain against one `VetoContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoResult {
    pub passed: bool,
    pub stage: Option<VetoStage>,
    pub reason: Option<String>,
    pub adjusted_quantity: Option<f64>,
    pub adjusted_price: Option<f64>,
}

impl VetoResult {
    fn pass(adjusted_quantity: Option<f64>) -> Self {
        Self {
            passed: true,
            stage: None,
            reason: None,
            adjusted_quantity,
            adjusted_price: None,
        }
    }

    fn veto(stage: VetoStage, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            stage: Some(stage),
            reason: Some(reason.into()),
            adjusted_quantity: None,
            adjusted_price: None,
        }
    }
}

/// Run every stage in order, stopping at the first veto. Returns a passing
/// result (optionally carrying an adjusted quantity from the `position_size`
/// stage) if the trade clears all five.
pub fn evaluate(ctx: &VetoContext) -> VetoResult {
    if let Some(result) = check_position_size(ctx) {
        if !result.passed {
            return result;
        }
        let adjusted = result.adjusted_quantity;
        return chain_from(ctx, adjusted);
    }
    chain_from(ctx, None)
}

fn chain_from(ctx: &VetoContext, adjusted_quantity: Option<f64>) -> VetoResult {
    if let Some(result) = check_max_positions(ctx) {
        return result;
    }
    if let Some(result) = check_correlation(ctx) {
        return result;
    }
    if let Some(result) = check_drawdown(ctx) {
        return result;
    }
    if let Some(result) = check_daily_loss(ctx) {
        return result;
    }
    VetoResult::pass(adjusted_quantity)
}

/// Caps notional exposure to `max_position_size`, shrinking the quantity
/// rather than vetoing outright — unless the cap leaves nothing tradable.
fn check_position_size(ctx: &VetoContext) -> Option<VetoResult> {
    let notional = ctx.proposed_quantity * ctx.proposed_price;
    if notional <= ctx.max_position_size {
        return None;
    }
    if ctx.proposed_price <= 0.0 {
        return Some(VetoResult::veto(
            VetoStage::PositionSize,
            "proposed price is non-positive",
        ));
    }
    let capped_quantity = ctx.max_position_size / ctx.proposed_price;
    if capped_quantity <= 0.0 {
        return Some(VetoResult::veto(
            VetoStage::PositionSize,
            format!("notional {notional:.2} exceeds max_position_size {:.2} with no tradable remainder", ctx.max_position_size),
        ));
    }
    Some(VetoResult::pass(Some(capped_quantity)))
}

fn check_max_positions(ctx: &VetoContext) -> Option<VetoResult> {
    if ctx.open_position_count >= ctx.max_positions {
        return Some(VetoResult::veto(
            VetoStage::MaxPositions,
            format!(
                "{} open positions at cap of {}",
                ctx.open_position_count, ctx.max_positions
            ),
        ));
    }
    None
}

/// Placeholder stage. No cross-instrument correlation model exists yet, so
/// this never vetoes — see DESIGN.md Open Question (b).
fn check_correlation(_ctx: &VetoContext) -> Option<VetoResult> {
    None
}

fn check_drawdown(ctx: &VetoContext) -> Option<VetoResult> {
    if ctx.current_drawdown_pct >= ctx.max_drawdown_pct {
        return Some(VetoResult::veto(
            VetoStage::Drawdown,
            format!(
                "drawdown {:.2}% at or beyond limit {:.2}%",
                ctx.current_drawdown_pct, ctx.max_drawdown_pct
            ),
        ));
    }
    None
}

fn check_daily_loss(ctx: &VetoContext) -> Option<VetoResult> {
    if ctx.daily_pnl_pct <= -ctx.daily_loss_limit_pct {
        return Some(VetoResult::veto(
            VetoStage::DailyLoss,
            format!(
                "daily PnL {:.2}% at or beyond loss limit {:.2}%",
                ctx.daily_pnl_pct, ctx.daily_loss_limit_pct
            ),
        ));
    }
    None
}
