use super::ClientError;
use crate::value_objects::candle::Candle;
use crate::value_objects::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn get_historical_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ClientError>;

    /// Bars closed since the previous poll, oldest first. An empty vec means
    /// nothing new.
    async fn poll_latest_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>, ClientError>;

    async fn get_current_price(&self, symbol: &str) -> Result<f64, ClientError>;
}
