// =============================================================================
// Order Manager — submission, filter rounding, dry-run fills, reconciliation
// =============================================================================
//
// Accepts an approved signal plus a sized quantity/price, rounds to the
// venue's per-instrument filters (fetched once at startup and cached),
// submits a market entry followed by a protective stop, and reconciles the
// local position set against the venue's view on startup and on every
// status transition.
//
// Grounded on the reference engine's `execution.rs` (demo-vs-live dispatch,
// synthetic fill construction) and `reconcile.rs` (fetch-venue-state,
// diff-against-local, report-mismatch shape), combined and retargeted to the
// futures venue trait and the simpler single-stop/take-profit `Position`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::position::{ExitReason, PositionManager};
use crate::risk::round_to_tick;
use crate::rules::engine::Signal;
use crate::types::{Action, Side};
use crate::venue::binance_futures::{BinanceFuturesClient, InstrumentFilters, OrderType, VenueError, VenuePosition};

/// Exponential backoff schedule for `VenueError::Transient`, per §7: retry
/// at 1, 2, 4, 8, then 16 seconds before giving up and counting the call as
/// one aborted decision.
const RETRY_BACKOFF_SECS: [u64; 5] = [1, 2, 4, 8, 16];

/// Outcome of one order-submission attempt.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    Filled {
        position_id: String,
        fill_price: f64,
        quantity: f64,
        /// `Some(deviation_pct)` when the fill breached `max_slippage_pct`,
        /// for the orchestrator to act on (RUNNING → DEGRADED).
        slippage_breach_pct: Option<f64>,
    },
    /// `VenueReject`: filter violation, insufficient margin, unknown
    /// symbol. The decision is aborted but the system stays RUNNING.
    VenueRejected { reason: String },
    /// `VenueTransient` exhausted its retry budget. Counts toward the
    /// orchestrator's consecutive-failure tally.
    VenueTransient { reason: String },
    /// `VenueAuthentication`: bad or revoked credentials. Escalates to
    /// SAFE_MODE immediately, bypassing the consecutive-failure counter.
    VenueAuthFailure { reason: String },
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub mismatched_instruments: Vec<String>,
    pub resolved_by_adopting_venue: bool,
}

/// Default slippage warn threshold, matching `Config::max_slippage_pct`'s
/// documented default (0.1%). The order manager is handed the configured
/// value at construction; this constant only documents that default.
pub const DEFAULT_MAX_SLIPPAGE_PCT: f64 = 0.1;

pub struct OrderManager {
    venue: Arc<BinanceFuturesClient>,
    positions: Arc<PositionManager>,
    dry_run: bool,
    max_slippage_pct: f64,
    filters: RwLock<HashMap<String, InstrumentFilters>>,
}

impl OrderManager {
    pub fn new(venue: Arc<BinanceFuturesClient>, positions: Arc<PositionManager>, dry_run: bool, max_slippage_pct: f64) -> Self {
        Self {
            venue,
            positions,
            dry_run,
            max_slippage_pct,
            filters: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch and cache `instrument`'s lot step / tick size / min notional.
    /// Called once per instrument at startup; safe to call again to refresh.
    pub async fn cache_filters(&self, instrument: &str) -> Result<InstrumentFilters> {
        let filters = self
            .venue
            .exchange_info(instrument)
            .await
            .with_context(|| format!("failed to fetch exchange filters for {instrument}"))?;
        self.filters.write().insert(instrument.to_string(), filters);
        Ok(filters)
    }

    fn filters_for(&self, instrument: &str) -> InstrumentFilters {
        self.filters
            .read()
            .get(instrument)
            .copied()
            .unwrap_or(InstrumentFilters { lot_step: 0.001, tick_size: 0.01, min_notional: 5.0 })
    }

    /// Submit one order, retrying `VenueError::Transient` failures on the
    /// §7 backoff schedule. `Reject` and `Authentication` are returned
    /// immediately — retrying them would not help.
    async fn new_order_with_retry(
        &self,
        instrument: &str,
        side: &str,
        order_type: OrderType,
        quantity: f64,
        stop_price: Option<f64>,
        reduce_only: bool,
    ) -> Result<crate::venue::binance_futures::OrderAck, VenueError> {
        let mut attempt = 0;
        loop {
            match self.venue.new_order(instrument, side, order_type, quantity, stop_price, reduce_only).await {
                Ok(ack) => return Ok(ack),
                Err(VenueError::Transient(reason)) => {
                    if attempt >= RETRY_BACKOFF_SECS.len() {
                        return Err(VenueError::Transient(reason));
                    }
                    let delay = RETRY_BACKOFF_SECS[attempt];
                    warn!(instrument, attempt = attempt + 1, delay, reason, "venue order transient failure, retrying after backoff");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Submit an approved entry: a MARKET order for `quantity` at (suggested)
    /// `price`, followed by a protective STOP_MARKET at `entry ± ATR *
    /// stop_atr_multiplier`. Dry-run mode synthesizes a fill at the
    /// submission price without calling the venue.
    pub async fn submit_entry(
        &self,
        signal: &Signal,
        quantity: f64,
        stop_atr_multiplier: f64,
    ) -> Result<SubmissionOutcome> {
        let instrument = signal.instrument.as_str();
        let filters = self.filters_for(instrument);
        let rounded_qty = round_down_to_step(quantity, filters.lot_step);
        if rounded_qty <= 0.0 {
            return Ok(SubmissionOutcome::VenueRejected { reason: "rounded quantity is zero".into() });
        }

        let side = match signal.action {
            Action::ProposeLong => Side::Long,
            Action::ProposeShort => Side::Short,
            _ => anyhow::bail!("submit_entry called with a non-directional action"),
        };
        let venue_side = match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };

        let entry_price = round_to_tick(signal.suggested_price, filters.tick_size);
        let atr = signal.atr_snapshot.unwrap_or(0.0);
        let stop_distance = atr * stop_atr_multiplier;
        let stop_price = round_to_tick(
            match side {
                Side::Long => entry_price - stop_distance,
                Side::Short => entry_price + stop_distance,
            },
            filters.tick_size,
        );

        let mut slippage_breach_pct = None;
        let fill_price = if self.dry_run {
            info!(instrument, side = venue_side, quantity = rounded_qty, price = entry_price, "dry-run entry simulated");
            entry_price
        } else {
            let ack = match self.new_order_with_retry(instrument, venue_side, OrderType::Market, rounded_qty, None, false).await {
                Ok(ack) => ack,
                Err(VenueError::Authentication(reason)) => return Ok(SubmissionOutcome::VenueAuthFailure { reason }),
                Err(VenueError::Reject(reason)) => return Ok(SubmissionOutcome::VenueRejected { reason }),
                Err(VenueError::Transient(reason)) => return Ok(SubmissionOutcome::VenueTransient { reason }),
            };

            slippage_breach_pct = self.check_slippage(instrument, entry_price, ack.avg_price);

            let stop_side = match side {
                Side::Long => "SELL",
                Side::Short => "BUY",
            };
            if let Err(e) = self.new_order_with_retry(instrument, stop_side, OrderType::StopMarket, rounded_qty, Some(stop_price), true).await {
                warn!(instrument, error = %e, "protective stop submission failed after entry filled");
            }

            if ack.avg_price > 0.0 { ack.avg_price } else { entry_price }
        };

        let take_profit = match side {
            Side::Long => entry_price + stop_distance * 2.0,
            Side::Short => entry_price - stop_distance * 2.0,
        };

        let strategy = if signal.contributing_rules.is_empty() {
            "UNKNOWN".to_string()
        } else {
            signal.contributing_rules.join("+")
        };

        let position_id = self.positions.open_position(
            instrument,
            side,
            fill_price,
            rounded_qty,
            stop_price,
            take_profit,
            &strategy,
            signal.regime.directional,
        );

        Ok(SubmissionOutcome::Filled { position_id, fill_price, quantity: rounded_qty, slippage_breach_pct })
    }

    /// Submit a market exit for the open position on `instrument`, closing
    /// it locally on success.
    pub async fn submit_close(&self, instrument: &str, reason: ExitReason, current_price: f64) -> Result<Option<f64>> {
        let Some(pos) = self.positions.get_open_position_for(instrument) else {
            return Ok(None);
        };

        let close_side = match pos.side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };

        let close_price = if self.dry_run {
            current_price
        } else {
            let ack = self
                .new_order_with_retry(instrument, close_side, OrderType::Market, pos.quantity, None, true)
                .await
                .with_context(|| format!("failed to submit close order for {instrument}"))?;
            if ack.avg_price > 0.0 { ack.avg_price } else { current_price }
        };

        Ok(self.positions.close_position(&pos.id, reason, close_price))
    }

    /// Returns `Some(deviation_pct)` when the fill breached `max_slippage_pct`,
    /// so the caller can surface it to the orchestrator instead of it only
    /// being visible in logs.
    fn check_slippage(&self, instrument: &str, quote_price: f64, fill_price: f64) -> Option<f64> {
        if quote_price <= 0.0 || fill_price <= 0.0 {
            return None;
        }
        let deviation_pct = ((fill_price - quote_price).abs() / quote_price) * 100.0;
        if deviation_pct > self.max_slippage_pct {
            warn!(instrument, quote_price, fill_price, deviation_pct, "fill slippage exceeds configured threshold");
            Some(deviation_pct)
        } else {
            None
        }
    }

    /// Fetch the venue's open positions and diff them against the local
    /// open set. On any mismatch, local state adopts the venue's view
    /// (the venue is always authoritative for what is actually at risk) and
    /// the mismatch is reported so the caller can raise a CRITICAL alert and
    /// consider a SAFE_MODE transition.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        if self.dry_run {
            return Ok(ReconcileReport { mismatched_instruments: Vec::new(), resolved_by_adopting_venue: false });
        }
        let venue_positions = self.venue.positions().await.context("failed to fetch venue positions for reconciliation")?;
        let local = self.positions.get_open_positions();
        let mismatched = diff_against_venue(&local, &venue_positions);

        let resolved = !mismatched.is_empty();
        if resolved {
            warn!(mismatched = ?mismatched, "reconciliation mismatch detected, adopting venue's view");
            let venue_by_instrument: HashMap<&str, &VenuePosition> =
                venue_positions.iter().map(|p| (p.instrument.as_str(), p)).collect();
            for instrument in &mismatched {
                if let Some(pos) = self.positions.get_open_position_for(instrument) {
                    if !venue_by_instrument.contains_key(instrument.as_str()) {
                        self.positions.close_position(&pos.id, ExitReason::Manual, pos.current_price);
                    }
                }
            }
        }

        Ok(ReconcileReport { mismatched_instruments: mismatched, resolved_by_adopting_venue: resolved })
    }
}

/// Pure diff between the local open set and the venue's reported positions,
/// used by both `reconcile` and its tests. An instrument mismatches if either
/// side has a position the other doesn't, or the quantities disagree.
pub(crate) fn diff_against_venue(local: &[crate::position::Position], venue_positions: &[VenuePosition]) -> Vec<String> {
    let venue_by_instrument: HashMap<&str, &VenuePosition> =
        venue_positions.iter().map(|p| (p.instrument.as_str(), p)).collect();

    let mut mismatched = Vec::new();
    for pos in local {
        match venue_by_instrument.get(pos.instrument.as_str()) {
            Some(venue_pos) if (venue_pos.quantity.abs() - pos.quantity).abs() < 1e-9 => {}
            _ => mismatched.push(pos.instrument.clone()),
        }
    }
    for instrument in venue_by_instrument.keys() {
        if local.iter().all(|p| p.instrument != *instrument) {
            mismatched.push(instrument.to_string());
        }
    }
    mismatched
}

fn round_down_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_down_to_step_truncates_toward_zero() {
        assert!((round_down_to_step(1.2345, 0.001) - 1.234).abs() < 1e-9);
    }

    #[test]
    fn round_down_to_step_handles_zero_step() {
        assert_eq!(round_down_to_step(1.2345, 0.0), 1.2345);
    }

    #[tokio::test]
    async fn submit_entry_in_dry_run_synthesizes_a_fill_without_venue_calls() {
        let venue = Arc::new(BinanceFuturesClient::new("key", "secret"));
        let positions = Arc::new(PositionManager::new());
        let mgr = OrderManager::new(venue, positions.clone(), true, DEFAULT_MAX_SLIPPAGE_PCT);

        let signal = Signal {
            instrument: "BTCUSDT".to_string(),
            action: Action::ProposeLong,
            bias: 0.9,
            confidence: 1.0,
            contributing_rules: vec!["TURTLE_55DAY_BREAKOUT_LONG".to_string()],
            regime: crate::regime::classifier::Regime {
                directional: crate::types::DirectionalRegime::Bull,
                volatility: crate::types::VolatilityRegime::Normal,
            },
            atr_snapshot: Some(0.5),
            suggested_price: 100.0,
        };

        let outcome = mgr.submit_entry(&signal, 1.0, 2.0).await.unwrap();
        match outcome {
            SubmissionOutcome::Filled { quantity, slippage_breach_pct, .. } => {
                assert_eq!(quantity, 1.0);
                assert!(slippage_breach_pct.is_none());
            }
            other => panic!("expected Filled, got {other:?}"),
        }
        assert_eq!(positions.open_count(), 1);
    }

    #[tokio::test]
    async fn submit_entry_rejects_when_rounded_quantity_is_zero() {
        let venue = Arc::new(BinanceFuturesClient::new("key", "secret"));
        let positions = Arc::new(PositionManager::new());
        let mgr = OrderManager::new(venue, positions, true, DEFAULT_MAX_SLIPPAGE_PCT);
        mgr.filters.write().insert("BTCUSDT".to_string(), InstrumentFilters { lot_step: 10.0, tick_size: 0.01, min_notional: 5.0 });

        let signal = Signal {
            instrument: "BTCUSDT".to_string(),
            action: Action::ProposeLong,
            bias: 0.9,
            confidence: 1.0,
            contributing_rules: vec![],
            regime: crate::regime::classifier::Regime {
                directional: crate::types::DirectionalRegime::Bull,
                volatility: crate::types::VolatilityRegime::Normal,
            },
            atr_snapshot: Some(0.5),
            suggested_price: 100.0,
        };

        let outcome = mgr.submit_entry(&signal, 1.0, 2.0).await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::VenueRejected { .. }));
    }

    #[test]
    fn check_slippage_flags_deviation_past_threshold() {
        let venue = Arc::new(BinanceFuturesClient::new("key", "secret"));
        let positions = Arc::new(PositionManager::new());
        let mgr = OrderManager::new(venue, positions, true, DEFAULT_MAX_SLIPPAGE_PCT);

        assert_eq!(mgr.check_slippage("BTCUSDT", 100.0, 100.05), None);
        let breach = mgr.check_slippage("BTCUSDT", 100.0, 101.0);
        assert!(breach.is_some());
        assert!((breach.unwrap() - 1.0).abs() < 1e-9);
    }

    /// S6: a restart restores one persisted LONG 0.5 BTC, but the venue
    /// reports no open positions at all — the mismatch must be detected and
    /// local state must adopt the venue's (empty) view.
    #[test]
    fn restart_reconciliation_adopts_venue_view_when_venue_reports_no_positions() {
        let positions = PositionManager::new();
        let id = positions.open_position(
            "BTCUSDT", Side::Long, 60_000.0, 0.5, 58_000.0, 64_000.0,
            "TURTLE_55DAY_BREAKOUT_LONG", crate::types::DirectionalRegime::Bull,
        );
        let local = positions.get_open_positions();

        let mismatched = diff_against_venue(&local, &[]);
        assert_eq!(mismatched, vec!["BTCUSDT".to_string()]);

        // Mirrors `reconcile`'s adoption step: any mismatched instrument the
        // venue doesn't report at all gets closed locally.
        let pos = positions.get_open_position_for("BTCUSDT").unwrap();
        assert_eq!(pos.id, id);
        positions.close_position(&pos.id, ExitReason::Manual, pos.current_price);

        assert_eq!(positions.open_count(), 0);
    }

    #[test]
    fn diff_against_venue_agrees_when_quantities_match() {
        let positions = PositionManager::new();
        positions.open_position(
            "BTCUSDT", Side::Long, 60_000.0, 0.5, 58_000.0, 64_000.0,
            "TURTLE_55DAY_BREAKOUT_LONG", crate::types::DirectionalRegime::Bull,
        );
        let local = positions.get_open_positions();
        let venue = vec![VenuePosition { instrument: "BTCUSDT".to_string(), quantity: 0.5, entry_price: 60_000.0, unrealized_pnl: 0.0 }];
        assert!(diff_against_venue(&local, &venue).is_empty());
    }

    #[test]
    fn check_slippage_ignores_non_positive_prices() {
        let venue = Arc::new(BinanceFuturesClient::new("key", "secret"));
        let positions = Arc::new(PositionManager::new());
        let mgr = OrderManager::new(venue, positions, true, DEFAULT_MAX_SLIPPAGE_PCT);

        assert_eq!(mgr.check_slippage("BTCUSDT", 0.0, 100.0), None);
        assert_eq!(mgr.check_slippage("BTCUSDT", 100.0, 0.0), None);
    }
}
