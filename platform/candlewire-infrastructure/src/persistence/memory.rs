//! In-memory repositories keyed on the natural keys the ports promise.
//! Inserts are compare-and-set: the first write of a key wins and later
//! writes report `false`, which is what makes redelivery a no-op upstream.

use async_trait::async_trait;
use candlewire_domain::entities::strategy::Strategy;
use candlewire_domain::repositories::{CandleRepository, DecisionRepository, StrategyRepository};
use candlewire_domain::value_objects::candle::{Candle, CandleKey};
use candlewire_domain::value_objects::decision::{DecisionKey, TradeDecision};
use candlewire_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryCandleRepository {
    inner: Mutex<BTreeMap<CandleKey, Candle>>,
}

impl MemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl CandleRepository for MemoryCandleRepository {
    async fn upsert(&self, candle: &Candle) -> Result<bool, String> {
        let mut inner = self.inner.lock();
        let key = candle.key();
        if inner.contains_key(&key) {
            return Ok(false);
        }
        inner.insert(key, candle.clone());
        Ok(true)
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, String> {
        let inner = self.inner.lock();
        Ok(inner
            .values()
            .filter(|c| {
                c.symbol == symbol
                    && c.timeframe == timeframe
                    && c.timestamp >= start
                    && c.timestamp <= end
            })
            .cloned()
            .collect())
    }

    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, String> {
        let inner = self.inner.lock();
        let matching: Vec<Candle> = inner
            .values()
            .filter(|c| c.symbol == symbol && c.timeframe == timeframe)
            .cloned()
            .collect();
        let start = matching.len().saturating_sub(limit);
        Ok(matching[start..].to_vec())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDecisionRepository {
    inner: Mutex<BTreeMap<DecisionKey, TradeDecision>>,
}

impl MemoryDecisionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<TradeDecision> {
        self.inner.lock().values().cloned().collect()
    }
}

#[async_trait]
impl DecisionRepository for MemoryDecisionRepository {
    async fn upsert(&self, decision: &TradeDecision) -> Result<bool, String> {
        let mut inner = self.inner.lock();
        let key = decision.key();
        if inner.contains_key(&key) {
            return Ok(false);
        }
        inner.insert(key, decision.clone());
        Ok(true)
    }

    async fn find(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candle_timestamp: DateTime<Utc>,
    ) -> Result<Option<TradeDecision>, String> {
        let key = DecisionKey {
            symbol: symbol.to_string(),
            timeframe,
            candle_timestamp,
        };
        Ok(self.inner.lock().get(&key).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStrategyRepository {
    inner: Mutex<BTreeMap<Uuid, Strategy>>,
}

impl MemoryStrategyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategies(strategies: Vec<Strategy>) -> Self {
        let inner = strategies.into_iter().map(|s| (s.id, s)).collect();
        Self {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl StrategyRepository for MemoryStrategyRepository {
    async fn list_enabled(&self, timeframe: Timeframe) -> Result<Vec<Strategy>, String> {
        let mut strategies: Vec<Strategy> = self
            .inner
            .lock()
            .values()
            .filter(|s| s.enabled && s.timeframe == timeframe)
            .cloned()
            .collect();
        strategies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(strategies)
    }

    async fn list_all(&self) -> Result<Vec<Strategy>, String> {
        let mut strategies: Vec<Strategy> = self.inner.lock().values().cloned().collect();
        strategies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(strategies)
    }

    async fn upsert(&self, strategy: &Strategy) -> Result<(), String> {
        self.inner.lock().insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool, String> {
        Ok(self.inner.lock().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewire_domain::value_objects::decision::TradeAction;
    use chrono::TimeZone;

    fn candle(minute: u32) -> Candle {
        Candle {
            symbol: "SPY".to_string(),
            timeframe: Timeframe::Min5,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 14, minute, 0).unwrap(),
            open: 400.0,
            high: 401.0,
            low: 399.0,
            close: 400.0 + minute as f64,
            volume: 1_000.0,
        }
    }

    #[tokio::test]
    async fn candle_upsert_is_first_write_wins() {
        let repo = MemoryCandleRepository::new();
        let original = candle(30);
        assert!(repo.upsert(&original).await.unwrap());

        let mut replay = candle(30);
        replay.close = 999.0;
        assert!(!repo.upsert(&replay).await.unwrap());

        let stored = repo
            .recent("SPY", Timeframe::Min5, 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!((stored[0].close - original.close).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recent_returns_newest_window_oldest_first() {
        let repo = MemoryCandleRepository::new();
        for minute in [30, 35, 40, 45] {
            repo.upsert(&candle(minute)).await.unwrap();
        }
        let recent = repo.recent("SPY", Timeframe::Min5, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp.format("%M").to_string(), "40");
        assert_eq!(recent[1].timestamp.format("%M").to_string(), "45");
    }

    #[tokio::test]
    async fn range_is_inclusive_and_scoped_to_the_series() {
        let repo = MemoryCandleRepository::new();
        for minute in [30, 35, 40] {
            repo.upsert(&candle(minute)).await.unwrap();
        }
        let mut other = candle(35);
        other.symbol = "QQQ".to_string();
        repo.upsert(&other).await.unwrap();

        let start = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 14, 35, 0).unwrap();
        let range = repo
            .range("SPY", Timeframe::Min5, start, end)
            .await
            .unwrap();
        assert_eq!(range.len(), 2);
    }

    #[tokio::test]
    async fn decision_upsert_dedupes_on_candle_key() {
        let repo = MemoryDecisionRepository::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let first = TradeDecision::new("SPY", Timeframe::Min5, t0, TradeAction::Buy);
        let second = TradeDecision::new("SPY", Timeframe::Min5, t0, TradeAction::Sell);

        assert!(repo.upsert(&first).await.unwrap());
        assert!(!repo.upsert(&second).await.unwrap());

        let found = repo.find("SPY", Timeframe::Min5, t0).await.unwrap();
        assert_eq!(found.map(|d| d.action), Some(TradeAction::Buy));
    }

    #[tokio::test]
    async fn strategies_filter_on_enabled_and_timeframe() {
        let mut active = Strategy::new("active", Timeframe::Min5, TradeAction::Buy);
        active.enabled = true;
        let mut dormant = Strategy::new("dormant", Timeframe::Min5, TradeAction::Buy);
        dormant.enabled = false;
        let hourly = Strategy::new("hourly", Timeframe::Hour1, TradeAction::Sell);

        let repo =
            MemoryStrategyRepository::with_strategies(vec![active.clone(), dormant, hourly]);
        let enabled = repo.list_enabled(Timeframe::Min5).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, active.id);
        assert_eq!(repo.list_all().await.unwrap().len(), 3);

        assert!(repo.remove(active.id).await.unwrap());
        assert!(!repo.remove(active.id).await.unwrap());
    }
}
