//! Persistence ports. All writes are idempotent upserts on natural keys, so a
//! redelivered event lands as a no-op instead of a duplicate-key failure.

use crate::entities::strategy::Strategy;
use crate::events::EventEnvelope;
use crate::value_objects::candle::Candle;
use crate::value_objects::decision::TradeDecision;
use crate::value_objects::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Returns `true` when the candle was new, `false` when the natural key
    /// (symbol, timeframe, timestamp) already existed.
    async fn upsert(&self, candle: &Candle) -> Result<bool, String>;

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, String>;

    /// Most recent `limit` candles, oldest first.
    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, String>;
}

#[async_trait]
pub trait DecisionRepository: Send + Sync {
    /// Returns `true` when the decision was new for its
    /// (symbol, timeframe, candle timestamp) key.
    async fn upsert(&self, decision: &TradeDecision) -> Result<bool, String>;

    async fn find(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candle_timestamp: DateTime<Utc>,
    ) -> Result<Option<TradeDecision>, String>;
}

#[async_trait]
pub trait StrategyRepository: Send + Sync {
    async fn list_enabled(&self, timeframe: Timeframe) -> Result<Vec<Strategy>, String>;
    async fn list_all(&self) -> Result<Vec<Strategy>, String>;
    async fn upsert(&self, strategy: &Strategy) -> Result<(), String>;
    async fn remove(&self, id: Uuid) -> Result<bool, String>;
}

/// Append-only audit destination for pipeline events.
pub trait EventSink: Send + Sync {
    fn append(&self, envelope: &EventEnvelope) -> Result<(), String>;
}
