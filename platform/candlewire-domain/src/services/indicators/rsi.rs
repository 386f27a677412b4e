use super::Calculator;
use crate::value_objects::candle::Candle;
use crate::value_objects::indicator::{IndicatorKind, IndicatorSnapshot, IndicatorValue};
use std::collections::BTreeMap;

pub struct RsiCalculator {
    period: usize,
}

impl RsiCalculator {
    pub fn new(period: usize) -> Result<Self, String> {
        if period == 0 {
            return Err("rsi period must be positive".to_string());
        }
        Ok(Self { period })
    }
}

impl Calculator for RsiCalculator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn can_calculate(&self, candles: &[Candle]) -> bool {
        candles.len() >= self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, String> {
        if !self.can_calculate(candles) {
            return Err(format!(
                "rsi needs at least {} bars, got {}",
                self.period + 1,
                candles.len()
            ));
        }
        // Simple averages over the trailing `period` close-to-close deltas.
        let window = &candles[candles.len() - self.period - 1..];
        let mut gain_sum = 0.0;
        let mut loss_sum = 0.0;
        for pair in window.windows(2) {
            let delta = pair[1].close - pair[0].close;
            if delta > 0.0 {
                gain_sum += delta;
            } else {
                loss_sum += -delta;
            }
        }
        let avg_gain = gain_sum / self.period as f64;
        let avg_loss = loss_sum / self.period as f64;

        let value = if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };

        let timestamp = candles
            .last()
            .map(|c| c.timestamp)
            .ok_or_else(|| "rsi input is empty".to_string())?;
        let mut periods = BTreeMap::new();
        periods.insert("period".to_string(), self.period as u32);

        Ok(IndicatorSnapshot {
            timestamp,
            value: IndicatorValue::Rsi { value },
            periods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::candles_from_closes;
    use super::*;

    fn rsi_of(calculator: &RsiCalculator, closes: &[f64]) -> f64 {
        match calculator
            .calculate(&candles_from_closes(closes))
            .unwrap()
            .value
        {
            IndicatorValue::Rsi { value } => value,
            _ => panic!("expected rsi"),
        }
    }

    #[test]
    fn monotonic_rise_pins_rsi_at_100() {
        let calculator = RsiCalculator::new(14).unwrap();
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi_of(&calculator, &closes), 100.0);
    }

    #[test]
    fn monotonic_fall_pins_rsi_at_0() {
        let calculator = RsiCalculator::new(14).unwrap();
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi_of(&calculator, &closes), 0.0);
    }

    #[test]
    fn flat_series_counts_as_no_losses() {
        let calculator = RsiCalculator::new(14).unwrap();
        assert_eq!(rsi_of(&calculator, &[100.0; 15]), 100.0);
    }

    #[test]
    fn balanced_moves_land_on_50() {
        let calculator = RsiCalculator::new(14).unwrap();
        let closes: Vec<f64> = (0..15)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        assert_eq!(rsi_of(&calculator, &closes), 50.0);
    }

    #[test]
    fn only_trailing_window_matters() {
        let calculator = RsiCalculator::new(5).unwrap();
        let tail = [100.0, 102.0, 101.0, 103.0, 102.0, 104.0];
        let mut with_history = vec![500.0, 8.0, 250.0, 90.0];
        with_history.extend_from_slice(&tail);
        assert_eq!(
            rsi_of(&calculator, &tail),
            rsi_of(&calculator, &with_history)
        );
    }

    #[test]
    fn insufficient_bars_is_a_reported_precondition() {
        let calculator = RsiCalculator::new(14).unwrap();
        let candles = candles_from_closes(&[100.0; 14]);
        assert!(!calculator.can_calculate(&candles));
        assert!(calculator
            .calculate(&candles)
            .unwrap_err()
            .contains("at least 15"));
    }
}
