use super::ClientError;
use crate::entities::portfolio::Portfolio;
use crate::value_objects::candle::Candle;
use crate::value_objects::decision::TradeDecision;
use crate::value_objects::indicator::IndicatorSet;
use crate::value_objects::timeframe::Timeframe;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything an external oracle gets to see when asked for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleContext {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub indicators: IndicatorSet,
    pub portfolio: Portfolio,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// A malformed response surfaces as [`ClientError::Parse`]; the caller
    /// substitutes a Hold decision carrying the parse error so every candle
    /// still gets an audit artifact.
    async fn decide(&self, context: &OracleContext) -> Result<TradeDecision, ClientError>;
}
