//! IndicatorsCalculated -> TradeProposed.
//!
//! Strategies run first, in listing order, and the first one that fires wins
//! the candle. The oracle is only consulted when no strategy fired. Every
//! produced decision is stored on its natural key before anything is
//! proposed; a duplicate store means this candle was already handled and the
//! stage stays silent. Hold decisions are stored for audit but never
//! proposed.

use super::{next_event, PipelineContext, DEP_ORACLE};
use candlewire_domain::events::{EventEnvelope, PipelineEvent};
use candlewire_domain::repositories::{ClientError, OracleContext};
use candlewire_domain::services::executor::{evaluate_strategy, EvaluationOutcome, SkipReason};
use candlewire_domain::value_objects::decision::{TradeAction, TradeDecision};
use candlewire_domain::value_objects::indicator::IndicatorSet;
use candlewire_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub(crate) fn spawn(
    ctx: Arc<PipelineContext>,
    bus: broadcast::Sender<EventEnvelope>,
    rx: broadcast::Receiver<EventEnvelope>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = rx;
        let mut shutdown = shutdown;
        while let Some(envelope) = next_event(&mut rx, &mut shutdown).await {
            let PipelineEvent::IndicatorsCalculated {
                symbol,
                timeframe,
                candle_timestamp,
                indicators,
            } = &envelope.event
            else {
                continue;
            };
            let symbol = symbol.clone();
            let timeframe = *timeframe;
            let candle_timestamp = *candle_timestamp;
            let indicators = indicators.clone();
            process(
                &ctx,
                &bus,
                &envelope,
                symbol,
                timeframe,
                candle_timestamp,
                indicators,
            )
            .await;
        }
    })
}

async fn process(
    ctx: &PipelineContext,
    bus: &broadcast::Sender<EventEnvelope>,
    envelope: &EventEnvelope,
    symbol: String,
    timeframe: Timeframe,
    candle_timestamp: DateTime<Utc>,
    indicators: IndicatorSet,
) {
    let started = Instant::now();
    let mut candles = match ctx
        .candles
        .recent(&symbol, timeframe, ctx.candle_lookback)
        .await
    {
        Ok(candles) => candles,
        Err(err) => {
            tracing::warn!(symbol, error = %err, "failed to load candles for evaluation");
            return;
        }
    };
    // Evaluate against the bars that existed when this candle closed.
    candles.retain(|candle| candle.timestamp <= candle_timestamp);
    let strategies = match ctx.strategies.list_enabled(timeframe).await {
        Ok(strategies) => strategies,
        Err(err) => {
            tracing::warn!(symbol, error = %err, "failed to load strategies");
            return;
        }
    };

    let now = Utc::now();
    let mut decision: Option<TradeDecision> = None;
    {
        let mut history = ctx.history.lock();
        if strategies.is_empty() {
            // Keep crossing history warm even with nothing to evaluate.
            for (_, snapshot) in indicators.iter() {
                history.record(&symbol, timeframe, snapshot.clone(), now);
            }
        }
        for strategy in &strategies {
            match evaluate_strategy(
                strategy,
                &symbol,
                timeframe,
                &candles,
                &indicators,
                &mut history,
                now,
            ) {
                Ok(EvaluationOutcome::Fired {
                    decision: fired, ..
                }) => {
                    tracing::info!(
                        symbol,
                        strategy = %strategy.name,
                        action = %fired.action,
                        confidence = fired.confidence,
                        "strategy fired"
                    );
                    if decision.is_none() {
                        decision = Some(fired);
                    }
                }
                Ok(EvaluationOutcome::NoSignal { .. }) => {}
                Ok(EvaluationOutcome::Skipped(reason)) => {
                    if let SkipReason::InsufficientCandles { have, need } = reason {
                        tracing::debug!(
                            symbol,
                            strategy = %strategy.name,
                            have,
                            need,
                            "strategy waiting for warmup"
                        );
                    }
                }
                // One broken strategy must not silence its siblings.
                Err(err) => {
                    metrics::counter!("candlewire.pipeline.strategy_failures").increment(1);
                    tracing::warn!(symbol, strategy = %strategy.name, error = %err, "strategy evaluation failed");
                }
            }
        }
    }

    if decision.is_none() {
        decision = consult_oracle(ctx, &symbol, timeframe, candle_timestamp, &candles, &indicators)
            .await;
    }
    metrics::histogram!("candlewire.pipeline.decisions_ms")
        .record(started.elapsed().as_millis() as f64);

    let Some(mut decision) = decision else {
        return;
    };
    // Pin the decision to this candle's natural key regardless of what the
    // producer filled in.
    decision.symbol = symbol;
    decision.timeframe = timeframe;
    decision.candle_timestamp = candle_timestamp;
    if decision.quantity.is_none() && decision.quantity_percent.is_none() {
        decision.quantity_percent = Some(ctx.default_order_percent);
    }

    match ctx.decisions.upsert(&decision).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(
                symbol = %decision.symbol,
                candle = %decision.candle_timestamp,
                "decision already recorded, skipping"
            );
            return;
        }
        Err(err) => {
            tracing::warn!(symbol = %decision.symbol, error = %err, "failed to store decision");
            return;
        }
    }

    if decision.action == TradeAction::Hold {
        tracing::debug!(symbol = %decision.symbol, "hold decision stored, nothing to propose");
        return;
    }
    metrics::counter!("candlewire.pipeline.trades_proposed").increment(1);
    let _ = bus.send(envelope.follow(PipelineEvent::TradeProposed { decision }));
}

async fn consult_oracle(
    ctx: &PipelineContext,
    symbol: &str,
    timeframe: Timeframe,
    candle_timestamp: DateTime<Utc>,
    candles: &[candlewire_domain::value_objects::candle::Candle],
    indicators: &IndicatorSet,
) -> Option<TradeDecision> {
    let oracle = ctx.oracle.as_ref()?;
    let context = OracleContext {
        symbol: symbol.to_string(),
        timeframe,
        candles: candles.to_vec(),
        indicators: indicators.clone(),
        portfolio: ctx.portfolio_snapshot(),
    };
    let guard = ctx.resilience.guard(DEP_ORACLE);
    match guard.execute("decide", || oracle.decide(&context)).await {
        Ok(decision) => Some(decision),
        // A malformed answer still becomes an auditable Hold artifact.
        Err(ClientError::Parse(err)) => Some(TradeDecision::parse_fallback(
            symbol,
            timeframe,
            candle_timestamp,
            &err,
        )),
        Err(err) => {
            tracing::warn!(symbol, error = %err, "oracle unavailable, no decision this candle");
            None
        }
    }
}
