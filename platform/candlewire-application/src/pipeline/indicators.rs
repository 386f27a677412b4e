//! CandleClosed -> IndicatorsCalculated.

use super::{next_event, PipelineContext};
use candlewire_domain::events::{EventEnvelope, PipelineEvent};
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
            let PipelineEvent::CandleClosed {
                symbol,
                timeframe,
                timestamp,
                ..
            } = &envelope.event
            else {
                continue;
            };
            let symbol = symbol.clone();
            let timeframe = *timeframe;
            let timestamp = *timestamp;
            process(&ctx, &bus, &envelope, symbol, timeframe, timestamp).await;
        }
    })
}

async fn process(
    ctx: &PipelineContext,
    bus: &broadcast::Sender<EventEnvelope>,
    envelope: &EventEnvelope,
    symbol: String,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
) {
    let started = Instant::now();
    let mut candles = match ctx
        .candles
        .recent(&symbol, timeframe, ctx.candle_lookback)
        .await
    {
        Ok(candles) => candles,
        Err(err) => {
            tracing::warn!(symbol, error = %err, "failed to load candles for indicators");
            return;
        }
    };
    // The poller may already have written bars past this event. Indicators
    // must reflect the closed candle, not whatever landed since.
    candles.retain(|candle| candle.timestamp <= timestamp);

    let (indicators, skipped) = ctx.calculators.calculate_ready(&candles);
    for note in &skipped {
        tracing::debug!(symbol, note, "indicator not ready");
    }
    metrics::histogram!("candlewire.pipeline.indicators_ms")
        .record(started.elapsed().as_millis() as f64);

    if indicators.is_empty() {
        tracing::debug!(symbol, bars = candles.len(), "no indicator ready yet");
        return;
    }

    let _ = bus.send(envelope.follow(PipelineEvent::IndicatorsCalculated {
        symbol,
        timeframe,
        candle_timestamp: timestamp,
        indicators,
    }));
}
