use crate::value_objects::side::Side;
use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_side(&self) -> Option<Side> {
        match self {
            TradeAction::Buy => Some(Side::Buy),
            TradeAction::Sell => Some(Side::Sell),
            TradeAction::Hold => None,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => f.write_str("buy"),
            TradeAction::Sell => f.write_str("sell"),
            TradeAction::Hold => f.write_str("hold"),
        }
    }
}

/// Candidate trade produced by the rule engine or the oracle. Natural key
/// (symbol, timeframe, candle_timestamp): a second decision for the same key
/// is a duplicate and must not re-enter the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candle_timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub quantity: Option<f64>,
    pub quantity_percent: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub confidence: f64,
    pub rationale: String,
    pub features: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecisionKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candle_timestamp: DateTime<Utc>,
}

impl TradeDecision {
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        candle_timestamp: DateTime<Utc>,
        action: TradeAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe,
            candle_timestamp,
            action,
            quantity: None,
            quantity_percent: None,
            stop_loss: None,
            take_profit: None,
            confidence: 0.0,
            rationale: String::new(),
            features: BTreeMap::new(),
        }
    }

    /// Fallback artifact for a malformed oracle response: Hold, zero
    /// confidence, parse error kept in the rationale for audit.
    pub fn parse_fallback(
        symbol: &str,
        timeframe: Timeframe,
        candle_timestamp: DateTime<Utc>,
        error: &str,
    ) -> Self {
        let mut decision = Self::new(symbol, timeframe, candle_timestamp, TradeAction::Hold);
        decision.rationale = format!("oracle response rejected: {error}");
        decision
    }

    pub fn key(&self) -> DecisionKey {
        DecisionKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            candle_timestamp: self.candle_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap()
    }

    #[test]
    fn new_decision_defaults() {
        let decision = TradeDecision::new("SPY", Timeframe::Min5, t0(), TradeAction::Buy);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.quantity.is_none());
        assert!(decision.features.is_empty());
    }

    #[test]
    fn parse_fallback_is_hold_with_error_in_rationale() {
        let decision =
            TradeDecision::parse_fallback("SPY", Timeframe::Min5, t0(), "missing field action");
        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.rationale.contains("missing field action"));
    }

    #[test]
    fn key_ignores_decision_id() {
        let a = TradeDecision::new("SPY", Timeframe::Min5, t0(), TradeAction::Buy);
        let b = TradeDecision::new("SPY", Timeframe::Min5, t0(), TradeAction::Sell);
        assert_ne!(a.id, b.id);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn hold_has_no_side() {
        assert_eq!(TradeAction::Hold.as_side(), None);
        assert_eq!(TradeAction::Buy.as_side(), Some(Side::Buy));
    }
}
