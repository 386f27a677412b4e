use super::{ema_series, Calculator};
use crate::value_objects::candle::Candle;
use crate::value_objects::indicator::{IndicatorKind, IndicatorSnapshot, IndicatorValue};
use std::collections::BTreeMap;

pub struct MacdCalculator {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdCalculator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, String> {
        if fast == 0 || slow == 0 || signal == 0 {
            return Err("macd periods must be positive".to_string());
        }
        if fast >= slow {
            return Err(format!(
                "macd fast period {fast} must be below slow period {slow}"
            ));
        }
        Ok(Self { fast, slow, signal })
    }

    fn required_bars(&self) -> usize {
        self.slow + self.signal
    }
}

impl Calculator for MacdCalculator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd
    }

    fn can_calculate(&self, candles: &[Candle]) -> bool {
        candles.len() >= self.required_bars()
    }

    fn calculate(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, String> {
        if !self.can_calculate(candles) {
            return Err(format!(
                "macd needs at least {} bars, got {}",
                self.required_bars(),
                candles.len()
            ));
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast_series = ema_series(&closes, self.fast);
        let slow_series = ema_series(&closes, self.slow);

        // Fast and slow EMAs align on close index: slow index k maps to
        // close index k + slow - 1, which is fast index k + (slow - fast).
        let offset = self.slow - self.fast;
        let macd_series: Vec<f64> = slow_series
            .iter()
            .enumerate()
            .map(|(k, slow)| fast_series[k + offset] - slow)
            .collect();
        let signal_series = ema_series(&macd_series, self.signal);

        let macd = macd_series
            .last()
            .copied()
            .ok_or_else(|| "macd series is empty".to_string())?;
        let signal = signal_series
            .last()
            .copied()
            .ok_or_else(|| "macd signal series is empty".to_string())?;
        let timestamp = candles
            .last()
            .map(|c| c.timestamp)
            .ok_or_else(|| "macd input is empty".to_string())?;

        let mut periods = BTreeMap::new();
        periods.insert("fast".to_string(), self.fast as u32);
        periods.insert("slow".to_string(), self.slow as u32);
        periods.insert("signal".to_string(), self.signal as u32);

        Ok(IndicatorSnapshot {
            timestamp,
            value: IndicatorValue::Macd {
                macd,
                signal,
                histogram: macd - signal,
            },
            periods,
        })
    }
}
