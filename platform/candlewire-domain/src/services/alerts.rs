//! Alert evaluation against the latest indicator snapshots.
//!
//! Threshold alerts look only at the current snapshot. Crossing alerts also
//! need the prior snapshot from [`IndicatorHistory`]; with no prior snapshot
//! they never fire. Boolean alert results can then be combined through the
//! strategy's condition tree by [`ConditionCombiner`].

use crate::entities::strategy::{
    AlertCondition, AlertConditionType, ConditionOperand, ConditionOperator, IndicatorAlert,
    Strategy,
};
use crate::services::history::IndicatorHistory;
use crate::value_objects::indicator::{IndicatorSet, IndicatorSnapshot, IndicatorValue};
use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Tolerance for `Equals` alerts on floating-point indicator values.
pub const EQUALS_EPSILON: f64 = 1e-9;

pub struct AlertContext<'a> {
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    pub indicators: &'a IndicatorSet,
    pub history: &'a IndicatorHistory,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertOutcome {
    pub alert_id: Uuid,
    pub matched: bool,
    pub description: String,
}

pub fn evaluate_alerts(alerts: &[IndicatorAlert], ctx: &AlertContext<'_>) -> Vec<AlertOutcome> {
    alerts
        .iter()
        .map(|alert| AlertOutcome {
            alert_id: alert.id,
            matched: evaluate_alert(alert, ctx),
            description: alert.describe(),
        })
        .collect()
}

pub fn evaluate_alert(alert: &IndicatorAlert, ctx: &AlertContext<'_>) -> bool {
    let Some(snapshot) = ctx.indicators.get(alert.indicator) else {
        return false;
    };
    match alert.condition {
        AlertConditionType::RisesAbove | AlertConditionType::GreaterThan => {
            match (alert_value(alert, snapshot), alert.threshold) {
                (Some(value), Some(threshold)) => value > threshold,
                _ => false,
            }
        }
        AlertConditionType::FallsBelow | AlertConditionType::LessThan => {
            match (alert_value(alert, snapshot), alert.threshold) {
                (Some(value), Some(threshold)) => value < threshold,
                _ => false,
            }
        }
        AlertConditionType::Equals => match (alert_value(alert, snapshot), alert.threshold) {
            (Some(value), Some(threshold)) => (value - threshold).abs() < EQUALS_EPSILON,
            _ => false,
        },
        AlertConditionType::CrossesAbove => evaluate_crossing(alert, snapshot, ctx, true),
        AlertConditionType::CrossesBelow => evaluate_crossing(alert, snapshot, ctx, false),
    }
}

/// Operative value for threshold comparisons: the explicitly requested field,
/// or the indicator's primary line when none is set.
fn alert_value(alert: &IndicatorAlert, snapshot: &IndicatorSnapshot) -> Option<f64> {
    match alert.field {
        Some(field) => snapshot.value.field(field),
        None => Some(snapshot.value.primary()),
    }
}

fn evaluate_crossing(
    alert: &IndicatorAlert,
    current: &IndicatorSnapshot,
    ctx: &AlertContext<'_>,
    above: bool,
) -> bool {
    let Some(previous) = ctx
        .history
        .previous(ctx.symbol, ctx.timeframe, alert.indicator, ctx.now)
    else {
        return false;
    };
    match (&current.value, &previous.value) {
        (
            IndicatorValue::Macd {
                macd: cur_macd,
                signal: cur_signal,
                ..
            },
            IndicatorValue::Macd {
                macd: prev_macd,
                signal: prev_signal,
                ..
            },
        ) => {
            let crossed = if above {
                *prev_macd <= *prev_signal && *cur_macd > *cur_signal
            } else {
                *prev_macd >= *prev_signal && *cur_macd < *cur_signal
            };
            crossed && threshold_side_ok(alert.threshold, *cur_macd, above)
        }
        (
            IndicatorValue::Stochastic {
                percent_k: cur_k,
                percent_d: cur_d,
            },
            IndicatorValue::Stochastic {
                percent_k: prev_k,
                percent_d: prev_d,
            },
        ) => {
            let crossed = if above {
                *prev_k <= *prev_d && *cur_k > *cur_d
            } else {
                *prev_k >= *prev_d && *cur_k < *cur_d
            };
            crossed && threshold_side_ok(alert.threshold, *cur_k, above)
        }
        (IndicatorValue::Rsi { value: cur }, IndicatorValue::Rsi { value: prev }) => {
            // RSI has a single line, so crossing is against the threshold.
            let Some(threshold) = alert.threshold else {
                return false;
            };
            if above {
                *prev <= threshold && *cur > threshold
            } else {
                *prev >= threshold && *cur < threshold
            }
        }
        _ => false,
    }
}

fn threshold_side_ok(threshold: Option<f64>, value: f64, above: bool) -> bool {
    match threshold {
        None => true,
        Some(t) if above => value > t,
        Some(t) => value < t,
    }
}

/// Resolves a strategy's condition tree against per-alert boolean results.
///
/// Operands may reference other conditions; resolution walks them with a
/// path set so a reference cycle evaluates to `false` instead of recursing
/// forever, while shared sub-conditions off the current path still resolve.
pub struct ConditionCombiner<'a> {
    strategy: &'a Strategy,
    alert_results: &'a HashMap<Uuid, bool>,
}

impl<'a> ConditionCombiner<'a> {
    pub fn new(strategy: &'a Strategy, alert_results: &'a HashMap<Uuid, bool>) -> Self {
        Self {
            strategy,
            alert_results,
        }
    }

    /// Any top-level condition passing means the strategy fires. A strategy
    /// with no conditions at all yields `false` here; callers fall back to
    /// plain alert matching in that case.
    pub fn evaluate_all(&self) -> bool {
        self.strategy
            .conditions
            .iter()
            .any(|condition| self.evaluate(condition))
    }

    pub fn evaluate(&self, condition: &AlertCondition) -> bool {
        let mut path = HashSet::new();
        path.insert(condition.id);
        self.resolve_condition(condition, &mut path)
    }

    fn resolve_condition(&self, condition: &AlertCondition, path: &mut HashSet<Uuid>) -> bool {
        let left = self.resolve_operand(condition.left, path);
        let right = self.resolve_operand(condition.right, path);
        match condition.operator {
            ConditionOperator::And => left && right,
            ConditionOperator::Or => left || right,
        }
    }

    fn resolve_operand(&self, operand: ConditionOperand, path: &mut HashSet<Uuid>) -> bool {
        match operand {
            ConditionOperand::Alert { id } => self.alert_results.get(&id).copied().unwrap_or(false),
            ConditionOperand::Condition { id } => {
                if path.contains(&id) {
                    return false;
                }
                let Some(condition) = self.strategy.condition(id) else {
                    return false;
                };
                path.insert(id);
                let result = self.resolve_condition(condition, path);
                path.remove(&id);
                result
            }
        }
    }
}
