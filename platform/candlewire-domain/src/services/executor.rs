//! Per-strategy evaluation of a closed candle.
//!
//! Snapshots are recorded into history before alerts run, so a crossing
//! observed on this candle is judged against the bar that preceded it.

use crate::entities::strategy::Strategy;
use crate::services::alerts::{evaluate_alerts, AlertContext, AlertOutcome, ConditionCombiner};
use crate::services::history::IndicatorHistory;
use crate::value_objects::candle::Candle;
use crate::value_objects::decision::TradeDecision;
use crate::value_objects::indicator::IndicatorSet;
use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Indicator warmup floor; strategies sit out until this many bars exist.
pub const MIN_CANDLES_FOR_EVALUATION: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    TimeframeMismatch,
    InsufficientCandles { have: usize, need: usize },
}

#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    Skipped(SkipReason),
    NoSignal { outcomes: Vec<AlertOutcome> },
    Fired { decision: TradeDecision, outcomes: Vec<AlertOutcome> },
}

pub fn evaluate_strategy(
    strategy: &Strategy,
    symbol: &str,
    timeframe: Timeframe,
    candles: &[Candle],
    indicators: &IndicatorSet,
    history: &mut IndicatorHistory,
    now: DateTime<Utc>,
) -> Result<EvaluationOutcome, String> {
    if !strategy.enabled {
        return Ok(EvaluationOutcome::Skipped(SkipReason::Disabled));
    }
    if strategy.timeframe != timeframe {
        return Ok(EvaluationOutcome::Skipped(SkipReason::TimeframeMismatch));
    }
    if candles.len() < MIN_CANDLES_FOR_EVALUATION {
        return Ok(EvaluationOutcome::Skipped(SkipReason::InsufficientCandles {
            have: candles.len(),
            need: MIN_CANDLES_FOR_EVALUATION,
        }));
    }
    let last_candle = candles
        .last()
        .ok_or_else(|| "cannot evaluate an empty candle series".to_string())?;

    // Record first: crossing alerts read `previous` from history, and the
    // same-timestamp rule keeps redelivered candles from faking a rotation.
    for (_, snapshot) in indicators.iter() {
        history.record(symbol, timeframe, snapshot.clone(), now);
    }

    let ctx = AlertContext {
        symbol,
        timeframe,
        indicators,
        history,
        now,
    };
    let outcomes = evaluate_alerts(&strategy.alerts, &ctx);

    let fired = if strategy.conditions.is_empty() {
        outcomes.iter().any(|outcome| outcome.matched)
    } else {
        let results: HashMap<_, _> = outcomes
            .iter()
            .map(|outcome| (outcome.alert_id, outcome.matched))
            .collect();
        ConditionCombiner::new(strategy, &results).evaluate_all()
    };
    if !fired {
        return Ok(EvaluationOutcome::NoSignal { outcomes });
    }

    let matched: Vec<&AlertOutcome> = outcomes.iter().filter(|o| o.matched).collect();
    let confidence = if strategy.alerts.is_empty() {
        0.5
    } else {
        (matched.len() as f64 / strategy.alerts.len() as f64).clamp(0.0, 1.0)
    };
    let rationale = if matched.is_empty() {
        strategy.name.clone()
    } else {
        let descriptions: Vec<&str> = matched.iter().map(|o| o.description.as_str()).collect();
        format!("{}: {}", strategy.name, descriptions.join(", "))
    };

    let mut decision = TradeDecision::new(
        symbol,
        timeframe,
        last_candle.timestamp,
        strategy.final_action,
    );
    decision.quantity_percent = strategy.quantity_percent;
    decision.confidence = confidence;
    decision.rationale = rationale;
    decision.features = indicators.flatten();

    Ok(EvaluationOutcome::Fired { decision, outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::strategy::{AlertConditionType, IndicatorAlert};
    use crate::value_objects::decision::TradeAction;
    use crate::value_objects::indicator::{IndicatorKind, IndicatorSnapshot, IndicatorValue};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 14, minute, 0).unwrap()
    }

    fn candles(count: usize, last_at: DateTime<Utc>) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let offset = chrono::Duration::minutes(5 * (count - 1 - i) as i64);
                Candle {
                    symbol: "SPY".to_string(),
                    timeframe: Timeframe::Min5,
                    timestamp: last_at - offset,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn rsi_set(at: DateTime<Utc>, value: f64) -> IndicatorSet {
        let mut set = IndicatorSet::new();
        set.insert(IndicatorSnapshot {
            timestamp: at,
            value: IndicatorValue::Rsi { value },
            periods: BTreeMap::new(),
        });
        set
    }

    fn macd_set(at: DateTime<Utc>, macd: f64, signal: f64) -> IndicatorSet {
        let mut set = IndicatorSet::new();
        set.insert(IndicatorSnapshot {
            timestamp: at,
            value: IndicatorValue::Macd {
                macd,
                signal,
                histogram: macd - signal,
            },
            periods: BTreeMap::new(),
        });
        set
    }

    fn rsi_alert(condition: AlertConditionType, threshold: Option<f64>) -> IndicatorAlert {
        IndicatorAlert {
            id: Uuid::new_v4(),
            indicator: IndicatorKind::Rsi,
            condition,
            threshold,
            field: None,
            timeframe: Timeframe::Min5,
            order_index: 0,
        }
    }

    #[test]
    fn disabled_and_mismatched_strategies_are_skipped() {
        let mut history = IndicatorHistory::with_default_ttl();
        let series = candles(20, t(30));
        let set = rsi_set(t(30), 75.0);

        let mut strategy = Strategy::new("momo", Timeframe::Min5, TradeAction::Buy);
        strategy.enabled = false;
        let outcome = evaluate_strategy(
            &strategy, "SPY", Timeframe::Min5, &series, &set, &mut history, t(30),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            EvaluationOutcome::Skipped(SkipReason::Disabled)
        ));

        let hourly = Strategy::new("momo", Timeframe::Hour1, TradeAction::Buy);
        let outcome = evaluate_strategy(
            &hourly, "SPY", Timeframe::Min5, &series, &set, &mut history, t(30),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            EvaluationOutcome::Skipped(SkipReason::TimeframeMismatch)
        ));

        // Skipped strategies leave no trace in history.
        assert!(history.is_empty());
    }

    #[test]
    fn short_series_skip_before_touching_history() {
        let mut history = IndicatorHistory::with_default_ttl();
        let strategy = Strategy::new("momo", Timeframe::Min5, TradeAction::Buy);
        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(13, t(30)),
            &rsi_set(t(30), 75.0),
            &mut history,
            t(30),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            EvaluationOutcome::Skipped(SkipReason::InsufficientCandles { have: 13, need: 14 })
        ));
        assert!(history.is_empty());
    }

    #[test]
    fn any_matching_alert_fires_without_conditions() {
        let mut history = IndicatorHistory::with_default_ttl();
        let mut strategy = Strategy::new("overbought exit", Timeframe::Min5, TradeAction::Sell);
        strategy.quantity_percent = Some(25.0);
        strategy.alerts = vec![
            rsi_alert(AlertConditionType::GreaterThan, Some(70.0)),
            rsi_alert(AlertConditionType::LessThan, Some(20.0)),
        ];

        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(20, t(30)),
            &rsi_set(t(30), 75.0),
            &mut history,
            t(30),
        )
        .unwrap();
        let EvaluationOutcome::Fired { decision, outcomes } = outcome else {
            panic!("expected a fired decision");
        };
        assert_eq!(decision.action, TradeAction::Sell);
        assert_eq!(decision.symbol, "SPY");
        assert_eq!(decision.candle_timestamp, t(30));
        assert_eq!(decision.quantity_percent, Some(25.0));
        assert_eq!(decision.confidence, 0.5);
        assert_eq!(decision.rationale, "overbought exit: rsi greater_than 70");
        assert_eq!(decision.features.get("rsi.value"), Some(&75.0));
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn no_matching_alert_means_no_decision() {
        let mut history = IndicatorHistory::with_default_ttl();
        let mut strategy = Strategy::new("momo", Timeframe::Min5, TradeAction::Buy);
        strategy.alerts = vec![rsi_alert(AlertConditionType::GreaterThan, Some(70.0))];

        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(20, t(30)),
            &rsi_set(t(30), 55.0),
            &mut history,
            t(30),
        )
        .unwrap();
        assert!(matches!(outcome, EvaluationOutcome::NoSignal { .. }));
        // History still advanced for the next candle's crossings.
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn full_match_yields_full_confidence() {
        let mut history = IndicatorHistory::with_default_ttl();
        let mut strategy = Strategy::new("momo", Timeframe::Min5, TradeAction::Buy);
        strategy.alerts = vec![rsi_alert(AlertConditionType::GreaterThan, Some(70.0))];

        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(20, t(30)),
            &rsi_set(t(30), 75.0),
            &mut history,
            t(30),
        )
        .unwrap();
        let EvaluationOutcome::Fired { decision, .. } = outcome else {
            panic!("expected a fired decision");
        };
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn conditions_override_any_alert_matching() {
        use crate::entities::strategy::{AlertCondition, ConditionOperand, ConditionOperator};

        let mut history = IndicatorHistory::with_default_ttl();
        let mut strategy = Strategy::new("strict", Timeframe::Min5, TradeAction::Buy);
        let a = rsi_alert(AlertConditionType::GreaterThan, Some(70.0));
        let b = rsi_alert(AlertConditionType::LessThan, Some(20.0));
        let (a_id, b_id) = (a.id, b.id);
        strategy.alerts = vec![a, b];
        strategy.conditions = vec![AlertCondition {
            id: Uuid::new_v4(),
            operator: ConditionOperator::And,
            left: ConditionOperand::Alert { id: a_id },
            right: ConditionOperand::Alert { id: b_id },
        }];

        // One alert matches; without conditions that would fire, with the
        // AND condition it must not.
        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(20, t(30)),
            &rsi_set(t(30), 75.0),
            &mut history,
            t(30),
        )
        .unwrap();
        assert!(matches!(outcome, EvaluationOutcome::NoSignal { .. }));
    }

    #[test]
    fn crossover_fires_on_the_second_candle_only() {
        let mut history = IndicatorHistory::with_default_ttl();
        let mut strategy = Strategy::new("golden", Timeframe::Min5, TradeAction::Buy);
        strategy.alerts = vec![IndicatorAlert {
            id: Uuid::new_v4(),
            indicator: IndicatorKind::Macd,
            condition: AlertConditionType::CrossesAbove,
            threshold: None,
            field: None,
            timeframe: Timeframe::Min5,
            order_index: 0,
        }];

        // First candle: macd below signal, and no history yet.
        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(20, t(30)),
            &macd_set(t(30), -0.5, -0.2),
            &mut history,
            t(30),
        )
        .unwrap();
        assert!(matches!(outcome, EvaluationOutcome::NoSignal { .. }));

        // Second candle: macd pops above signal.
        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(21, t(35)),
            &macd_set(t(35), 0.3, 0.1),
            &mut history,
            t(35),
        )
        .unwrap();
        assert!(matches!(outcome, EvaluationOutcome::Fired { .. }));

        // Redelivery of the same candle replaces history in place, so the
        // crossing still reads the pre-cross bar and fires identically.
        let outcome = evaluate_strategy(
            &strategy,
            "SPY",
            Timeframe::Min5,
            &candles(21, t(35)),
            &macd_set(t(35), 0.3, 0.1),
            &mut history,
            t(35),
        )
        .unwrap();
        assert!(matches!(outcome, EvaluationOutcome::Fired { .. }));
    }
}
