use super::Calculator;
use crate::value_objects::candle::Candle;
use crate::value_objects::indicator::{IndicatorKind, IndicatorSnapshot, IndicatorValue};
use std::collections::BTreeMap;

pub struct StochasticCalculator {
    k_period: usize,
    smoothing: usize,
    d_period: usize,
}

impl StochasticCalculator {
    pub fn new(k_period: usize, smoothing: usize, d_period: usize) -> Result<Self, String> {
        if k_period == 0 || smoothing == 0 || d_period == 0 {
            return Err("stochastic periods must be positive".to_string());
        }
        Ok(Self {
            k_period,
            smoothing,
            d_period,
        })
    }

    fn required_bars(&self) -> usize {
        self.k_period + self.d_period
    }

    fn raw_percent_k(&self, window: &[Candle]) -> f64 {
        let mut lowest = f64::INFINITY;
        let mut highest = f64::NEG_INFINITY;
        for candle in window {
            lowest = lowest.min(candle.low);
            highest = highest.max(candle.high);
        }
        let range = highest - lowest;
        if range == 0.0 {
            // A zero-range window has no direction; midpoint by convention.
            return 50.0;
        }
        let close = match window.last() {
            Some(candle) => candle.close,
            None => return 50.0,
        };
        (close - lowest) / range * 100.0
    }
}

/// Trailing mean of at most `width` values ending at `values[index]`.
fn trailing_mean(values: &[f64], index: usize, width: usize) -> f64 {
    let start = index.saturating_sub(width - 1);
    let slice = &values[start..=index];
    slice.iter().sum::<f64>() / slice.len() as f64
}

impl Calculator for StochasticCalculator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Stochastic
    }

    fn can_calculate(&self, candles: &[Candle]) -> bool {
        candles.len() >= self.required_bars()
    }

    fn calculate(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, String> {
        if !self.can_calculate(candles) {
            return Err(format!(
                "stochastic needs at least {} bars, got {}",
                self.required_bars(),
                candles.len()
            ));
        }

        let raw: Vec<f64> = (self.k_period - 1..candles.len())
            .map(|i| self.raw_percent_k(&candles[i + 1 - self.k_period..=i]))
            .collect();
        let smoothed: Vec<f64> = (0..raw.len())
            .map(|i| trailing_mean(&raw, i, self.smoothing))
            .collect();

        let percent_k = smoothed
            .last()
            .copied()
            .ok_or_else(|| "stochastic %K series is empty".to_string())?;
        let percent_d = trailing_mean(&smoothed, smoothed.len() - 1, self.d_period);

        let timestamp = candles
            .last()
            .map(|c| c.timestamp)
            .ok_or_else(|| "stochastic input is empty".to_string())?;
        let mut periods = BTreeMap::new();
        periods.insert("k".to_string(), self.k_period as u32);
        periods.insert("smoothing".to_string(), self.smoothing as u32);
        periods.insert("d".to_string(), self.d_period as u32);

        Ok(IndicatorSnapshot {
            timestamp,
            value: IndicatorValue::Stochastic {
                percent_k,
                percent_d,
            },
            periods,
        })
    }
}
