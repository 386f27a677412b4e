use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closed OHLCV bar. Immutable once created; `key()` is the idempotency
/// key for storage and downstream correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            timestamp: self.timestamp,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("candle symbol is empty".to_string());
        }
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() {
                return Err(format!("candle {name} is not finite for {}", self.symbol));
            }
        }
        if self.high < self.low {
            return Err(format!(
                "candle high {} below low {} for {} at {}",
                self.high, self.low, self.symbol, self.timestamp
            ));
        }
        if self.volume < 0.0 {
            return Err(format!(
                "candle volume {} is negative for {}",
                self.volume, self.symbol
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Candle {
        Candle {
            symbol: "SPY".to_string(),
            timeframe: Timeframe::Min5,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap(),
            open: 400.0,
            high: 410.0,
            low: 390.0,
            close: 405.0,
            volume: 1_000_000.0,
        }
    }

    #[test]
    fn validate_accepts_well_formed_candle() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_symbol() {
        let mut candle = sample();
        candle.symbol = "  ".to_string();
        assert!(candle.validate().unwrap_err().contains("symbol is empty"));
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let mut candle = sample();
        candle.high = 380.0;
        assert!(candle.validate().unwrap_err().contains("below low"));
    }

    #[test]
    fn validate_rejects_non_finite_price() {
        let mut candle = sample();
        candle.close = f64::NAN;
        assert!(candle.validate().unwrap_err().contains("not finite"));
    }

    #[test]
    fn key_orders_by_symbol_timeframe_timestamp() {
        let a = sample();
        let mut b = sample();
        b.timestamp = a.timestamp + chrono::Duration::minutes(5);
        assert!(a.key() < b.key());
        assert_eq!(a.key(), sample().key());
    }
}
