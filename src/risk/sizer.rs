// =============================================================================
// Volatility-Scaled Position Sizer
// =============================================================================
//
// Turtle-style "N-unit" sizing: risk a fixed fraction of equity per trade,
// scaled by the instrument's current ATR so a wider stop produces a smaller
// position and vice versa. Quantity is rounded down to the venue's lot step
// and clamped to the configured notional band before being handed to the
// order manager.
//
// No single reference-engine file does volatility-scaled sizing this way —
// `strategy.rs`'s position sizing is a flat `equity * base_position_pct /
// price` — but the rounding-to-exchange-filters discipline (round down
// quantity, round price to tick) is carried from there.

use serde::{Deserialize, Serialize};

/// Result of attempting to size a proposed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SizingOutcome {
    Sized { quantity: f64, notional: f64 },
    Rejected { reason: String },
}

/// Round `value` down to the nearest multiple of `step` (never rounds up —
/// a sizer must never size larger than what the risk budget allows).
fn round_down_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

/// Round `price` to the nearest multiple of `tick_size`.
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    (price / tick_size).round() * tick_size
}

#[allow(clippy::too_many_arguments)]
pub fn size_position(
    equity: f64,
    price: f64,
    atr: f64,
    risk_per_trade_pct: f64,
    stop_atr_multiplier: f64,
    min_position_notional: f64,
    max_position_notional: f64,
    lot_step: f64,
) -> SizingOutcome {
    if price <= 0.0 || atr <= 0.0 {
        return SizingOutcome::Rejected {
            reason: "QUANTITY_TOO_SMALL: non-positive price or ATR".to_string(),
        };
    }

    let stop_distance = atr * stop_atr_multiplier;
    if stop_distance <= 0.0 {
        return SizingOutcome::Rejected {
            reason: "QUANTITY_TOO_SMALL: non-positive stop distance".to_string(),
        };
    }

    let risk_amount = equity * risk_per_trade_pct;
    let mut quantity = risk_amount / stop_distance;
    let mut notional = quantity * price;

    if notional > max_position_notional {
        quantity = max_position_notional / price;
        notional = quantity * price;
    }

    let rounded_quantity = round_down_to_step(quantity, lot_step);
    let rounded_notional = rounded_quantity * price;

    if rounded_quantity <= 0.0 || rounded_notional < min_position_notional {
        return SizingOutcome::Rejected {
            reason: format!(
                "QUANTITY_TOO_SMALL: notional {rounded_notional:.4} below minimum {min_position_notional:.4}"
            ),
        };
    }

    SizingOutcome::Sized {
        quantity: rounded_quantity,
        notional: rounded_notional,
    }
}
