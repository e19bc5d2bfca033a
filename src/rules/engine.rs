// =============================================================================
// Rule Engine
// =============================================================================
//
// Evaluates the fixed rule catalog against one instrument's `FeatureMap` and
// aggregates the result into a single `Signal`. Deterministic and
// order-independent: the only inputs that affect the outcome are the
// catalog's fixed bias values, the optional per-rule weight overrides, and
// the feature snapshot itself.

use serde::{Deserialize, Serialize};

use crate::indicators::FeatureMap;
use crate::regime::Regime;
use crate::rules::catalog::CATALOG;
use crate::types::{Action, DirectionalRegime, RuleClass};

/// Bias magnitude above which a signal is actionable rather than NEUTRAL.
pub const DEFAULT_ACTIVATION_THRESHOLD: f64 = 0.7;

/// The engine's verdict for one instrument at one bar-close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub action: Action,
    pub bias: f64,
    pub confidence: f64,
    pub contributing_rules: Vec<String>,
    pub regime: Regime,
    pub atr_snapshot: Option<f64>,
    pub suggested_price: f64,
}

/// Per-rule weight override, keyed by rule name. Rules with no entry default
/// to a weight of 1.0.
pub type RuleWeights = std::collections::HashMap<String, f64>;

pub struct RuleEngine;

impl RuleEngine {
    /// Evaluate the full catalog for `instrument` against `features` under
    /// `regime`, producing a `Signal`. `CLOSE` is never produced here — only
    /// the orchestrator synthesizes exit signals from open-position state.
    pub fn evaluate(
        instrument: &str,
        features: &FeatureMap,
        regime: Regime,
        weights: &RuleWeights,
        activation_threshold: f64,
    ) -> Signal {
        let sideways_veto = regime.directional == DirectionalRegime::Range;

        let mut weighted_bias_sum = 0.0;
        let mut weight_total = 0.0;
        let mut long_votes = 0.0;
        let mut short_votes = 0.0;
        let mut contributing_rules = Vec::new();

        for rule in CATALOG {
            if !rule.allowed_regimes.contains(&regime.directional) {
                continue;
            }
            if sideways_veto && matches!(rule.class, RuleClass::Trend | RuleClass::Breakout) {
                continue;
            }
            if !(rule.predicate)(features) {
                continue;
            }

            let w = weights.get(rule.name).copied().unwrap_or(1.0);
            weighted_bias_sum += rule.bias * w;
            weight_total += w;
            if rule.bias > 0.0 {
                long_votes += w;
            } else if rule.bias < 0.0 {
                short_votes += w;
            }
            contributing_rules.push(rule.name.to_string());
        }

        let bias = if weight_total > 0.0 {
            weighted_bias_sum / weight_total
        } else {
            0.0
        };

        let total_votes = long_votes + short_votes;
        let confidence = if total_votes > 0.0 {
            long_votes.max(short_votes) / total_votes
        } else {
            0.0
        };

        let action = if bias.abs() >= activation_threshold {
            if bias > 0.0 {
                Action::ProposeLong
            } else {
                Action::ProposeShort
            }
        } else {
            Action::Neutral
        };

        Signal {
            instrument: instrument.to_string(),
            action,
            bias,
            confidence,
            contributing_rules,
            regime,
            atr_snapshot: features.atr14,
            suggested_price: features.close,
        }
    }
}
