//! Edge tasks that feed the bus from the outside world.
//!
//! The market poller is the pipeline's only event source in steady state:
//! it asks the feed for newly closed bars, persists them, and publishes
//! CandleClosed with a fresh correlation id per candle. The portfolio poller
//! keeps the risk gate's snapshot from going stale between fills.

use super::{refresh_portfolio, PipelineContext, DEP_MARKET_DATA};
use candlewire_domain::events::{EventEnvelope, PipelineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

const POLL_FAILURE_COOLDOWN: Duration = Duration::from_secs(1);

pub(crate) fn spawn_market_poller(
    ctx: Arc<PipelineContext>,
    bus: broadcast::Sender<EventEnvelope>,
    shutdown: watch::Receiver<bool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = shutdown;
        let mut ticker = tokio::time::interval(ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_empty: u32 = 0;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let guard = ctx.resilience.guard(DEP_MARKET_DATA);
            let batch = match guard
                .execute("poll_latest_bars", || {
                    ctx.market_data.poll_latest_bars(&ctx.symbol, ctx.timeframe)
                })
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    metrics::counter!("candlewire.pipeline.poll_failures").increment(1);
                    tracing::warn!(symbol = %ctx.symbol, error = %err, "market poll failed");
                    tokio::time::sleep(POLL_FAILURE_COOLDOWN).await;
                    continue;
                }
            };

            if batch.is_empty() {
                consecutive_empty += 1;
                if let Some(limit) = ctx.idle_shutdown_polls {
                    if consecutive_empty >= limit {
                        tracing::info!(
                            polls = consecutive_empty,
                            "feed exhausted, shutting pipeline down"
                        );
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
                continue;
            }
            consecutive_empty = 0;

            for candle in batch {
                if let Err(err) = candle.validate() {
                    metrics::counter!("candlewire.pipeline.dropped_candles").increment(1);
                    tracing::warn!(
                        symbol = %candle.symbol,
                        timestamp = %candle.timestamp,
                        error = %err,
                        "dropping malformed candle"
                    );
                    continue;
                }
                match ctx.candles.upsert(&candle).await {
                    Ok(true) => {
                        metrics::counter!("candlewire.pipeline.candles_ingested").increment(1);
                        let _ = bus.send(EventEnvelope::new(
                            Uuid::new_v4(),
                            PipelineEvent::candle_closed(&candle),
                        ));
                    }
                    Ok(false) => {
                        tracing::debug!(
                            symbol = %candle.symbol,
                            timestamp = %candle.timestamp,
                            "candle already stored, not republishing"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(symbol = %candle.symbol, error = %err, "failed to store candle");
                    }
                }
            }
        }
    })
}

pub(crate) fn spawn_portfolio_poller(
    ctx: Arc<PipelineContext>,
    bus: broadcast::Sender<EventEnvelope>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = shutdown;
        let mut ticker = tokio::time::interval(ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            match refresh_portfolio(&ctx).await {
                Ok(portfolio) => {
                    let _ = bus.send(EventEnvelope::new(
                        Uuid::new_v4(),
                        PipelineEvent::portfolio_updated(&portfolio),
                    ));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "portfolio poll failed");
                    tokio::time::sleep(POLL_FAILURE_COOLDOWN).await;
                }
            }
        }
    })
}
