//! Audit stage: every envelope on the bus goes to the event sink, and the
//! run's counters are tallied here rather than scattered across stages.

use super::next_event;
use candlewire_domain::events::{EventEnvelope, PipelineEvent};
use candlewire_domain::repositories::EventSink;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Live event counters for one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineStats {
    candles_closed: AtomicU64,
    indicators_calculated: AtomicU64,
    trades_proposed: AtomicU64,
    trades_rejected: AtomicU64,
    actions_required: AtomicU64,
    trades_approved: AtomicU64,
    orders_submitted: AtomicU64,
    orders_filled: AtomicU64,
    portfolio_updates: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`], also the shape persisted in the
/// run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub candles_closed: u64,
    pub indicators_calculated: u64,
    pub trades_proposed: u64,
    pub trades_rejected: u64,
    pub actions_required: u64,
    pub trades_approved: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub portfolio_updates: u64,
}

impl PipelineStats {
    pub fn record(&self, event: &PipelineEvent) {
        let counter = match event {
            PipelineEvent::CandleClosed { .. } => &self.candles_closed,
            PipelineEvent::IndicatorsCalculated { .. } => &self.indicators_calculated,
            PipelineEvent::TradeProposed { .. } => &self.trades_proposed,
            PipelineEvent::TradeRejected { .. } => &self.trades_rejected,
            PipelineEvent::ActionRequired { .. } => &self.actions_required,
            PipelineEvent::TradeApproved { .. } => &self.trades_approved,
            PipelineEvent::OrderSubmitted { .. } => &self.orders_submitted,
            PipelineEvent::OrderFilled { .. } => &self.orders_filled,
            PipelineEvent::PortfolioUpdated { .. } => &self.portfolio_updates,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            candles_closed: self.candles_closed.load(Ordering::Relaxed),
            indicators_calculated: self.indicators_calculated.load(Ordering::Relaxed),
            trades_proposed: self.trades_proposed.load(Ordering::Relaxed),
            trades_rejected: self.trades_rejected.load(Ordering::Relaxed),
            actions_required: self.actions_required.load(Ordering::Relaxed),
            trades_approved: self.trades_approved.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_filled: self.orders_filled.load(Ordering::Relaxed),
            portfolio_updates: self.portfolio_updates.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn spawn(
    sink: Arc<dyn EventSink>,
    stats: Arc<PipelineStats>,
    rx: broadcast::Receiver<EventEnvelope>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = rx;
        let mut shutdown = shutdown;
        while let Some(envelope) = next_event(&mut rx, &mut shutdown).await {
            stats.record(&envelope.event);
            metrics::counter!("candlewire.pipeline.events").increment(1);
            if let Err(err) = sink.append(&envelope) {
                tracing::warn!(event = envelope.event.name(), error = %err, "event sink write failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewire_domain::value_objects::candle::Candle;
    use candlewire_domain::value_objects::timeframe::Timeframe;
    use chrono::{TimeZone, Utc};

    #[test]
    fn record_buckets_by_variant() {
        let stats = PipelineStats::default();
        let candle = Candle {
            symbol: "SPY".to_string(),
            timeframe: Timeframe::Min5,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100.0,
        };
        stats.record(&PipelineEvent::candle_closed(&candle));
        stats.record(&PipelineEvent::candle_closed(&candle));
        stats.record(&PipelineEvent::TradeRejected {
            decision_id: uuid::Uuid::new_v4(),
            symbol: "SPY".to_string(),
            reason: "nope".to_string(),
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.candles_closed, 2);
        assert_eq!(snapshot.trades_rejected, 1);
        assert_eq!(snapshot.orders_filled, 0);
    }
}
