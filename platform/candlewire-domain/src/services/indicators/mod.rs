mod macd;
mod rsi;
mod stochastic;

pub use macd::MacdCalculator;
pub use rsi::RsiCalculator;
pub use stochastic::StochasticCalculator;

use crate::value_objects::candle::Candle;
use crate::value_objects::indicator::{IndicatorKind, IndicatorSet, IndicatorSnapshot};
use std::collections::BTreeMap;

/// A single technical indicator. `can_calculate` reports the bar-count
/// precondition so callers can skip instead of catching errors.
pub trait Calculator: Send + Sync {
    fn kind(&self) -> IndicatorKind;
    fn can_calculate(&self, candles: &[Candle]) -> bool;
    fn calculate(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorPeriods {
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub stochastic_k: usize,
    pub stochastic_smoothing: usize,
    pub stochastic_d: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            stochastic_k: 14,
            stochastic_smoothing: 3,
            stochastic_d: 3,
        }
    }
}

/// Kind-to-implementation registry built once at startup.
pub struct CalculatorRegistry {
    calculators: BTreeMap<IndicatorKind, Box<dyn Calculator>>,
}

impl CalculatorRegistry {
    pub fn from_periods(periods: &IndicatorPeriods) -> Result<Self, String> {
        let mut calculators: BTreeMap<IndicatorKind, Box<dyn Calculator>> = BTreeMap::new();
        let macd = MacdCalculator::new(periods.macd_fast, periods.macd_slow, periods.macd_signal)?;
        let rsi = RsiCalculator::new(periods.rsi_period)?;
        let stochastic = StochasticCalculator::new(
            periods.stochastic_k,
            periods.stochastic_smoothing,
            periods.stochastic_d,
        )?;
        calculators.insert(macd.kind(), Box::new(macd));
        calculators.insert(rsi.kind(), Box::new(rsi));
        calculators.insert(stochastic.kind(), Box::new(stochastic));
        Ok(Self { calculators })
    }

    pub fn with_defaults() -> Self {
        // Default periods are all valid, so construction cannot fail.
        match Self::from_periods(&IndicatorPeriods::default()) {
            Ok(registry) => registry,
            Err(_) => Self {
                calculators: BTreeMap::new(),
            },
        }
    }

    pub fn get(&self, kind: IndicatorKind) -> Option<&dyn Calculator> {
        self.calculators.get(&kind).map(|c| c.as_ref())
    }

    pub fn kinds(&self) -> Vec<IndicatorKind> {
        self.calculators.keys().copied().collect()
    }

    /// Runs every calculator whose precondition holds. Returns the snapshot
    /// set plus notes for calculators that were skipped or failed, so the
    /// caller can log them.
    pub fn calculate_ready(&self, candles: &[Candle]) -> (IndicatorSet, Vec<String>) {
        let mut set = IndicatorSet::new();
        let mut notes = Vec::new();
        for calculator in self.calculators.values() {
            if !calculator.can_calculate(candles) {
                notes.push(format!(
                    "{}: insufficient bars ({} available)",
                    calculator.kind(),
                    candles.len()
                ));
                continue;
            }
            match calculator.calculate(candles) {
                Ok(snapshot) => set.insert(snapshot),
                Err(err) => notes.push(format!("{}: {err}", calculator.kind())),
            }
        }
        (set, notes)
    }
}

/// EMA over `values` seeded with the simple average of the first `period`
/// entries; alpha = 2/(period+1). Output index 0 corresponds to input index
/// `period - 1`.
pub(crate) fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut prev = seed;
    out.push(seed);
    for value in &values[period..] {
        prev = value * alpha + prev * (1.0 - alpha);
        out.push(prev);
    }
    out
}
