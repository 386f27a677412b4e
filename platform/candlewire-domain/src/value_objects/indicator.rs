use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Macd,
    Rsi,
    Stochastic,
}

impl IndicatorKind {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_lowercase().as_str() {
            "macd" => Ok(IndicatorKind::Macd),
            "rsi" => Ok(IndicatorKind::Rsi),
            "stochastic" | "stoch" => Ok(IndicatorKind::Stochastic),
            _ => Err(format!("unknown indicator: {value}")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IndicatorKind::Macd => "macd",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Stochastic => "stochastic",
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Addressable output field of a multi-field indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorField {
    Macd,
    Signal,
    Histogram,
    Value,
    PercentK,
    PercentD,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorValue {
    Macd { macd: f64, signal: f64, histogram: f64 },
    Rsi { value: f64 },
    Stochastic { percent_k: f64, percent_d: f64 },
}

impl IndicatorValue {
    pub fn kind(&self) -> IndicatorKind {
        match self {
            IndicatorValue::Macd { .. } => IndicatorKind::Macd,
            IndicatorValue::Rsi { .. } => IndicatorKind::Rsi,
            IndicatorValue::Stochastic { .. } => IndicatorKind::Stochastic,
        }
    }

    /// Field lookup; `None` when the field does not belong to this variant.
    pub fn field(&self, field: IndicatorField) -> Option<f64> {
        match (self, field) {
            (IndicatorValue::Macd { macd, .. }, IndicatorField::Macd) => Some(*macd),
            (IndicatorValue::Macd { signal, .. }, IndicatorField::Signal) => Some(*signal),
            (IndicatorValue::Macd { histogram, .. }, IndicatorField::Histogram) => {
                Some(*histogram)
            }
            (IndicatorValue::Rsi { value }, IndicatorField::Value) => Some(*value),
            (IndicatorValue::Stochastic { percent_k, .. }, IndicatorField::PercentK) => {
                Some(*percent_k)
            }
            (IndicatorValue::Stochastic { percent_d, .. }, IndicatorField::PercentD) => {
                Some(*percent_d)
            }
            _ => None,
        }
    }

    /// Default comparison field per variant: the MACD line, the RSI value,
    /// smoothed %K.
    pub fn primary(&self) -> f64 {
        match self {
            IndicatorValue::Macd { macd, .. } => *macd,
            IndicatorValue::Rsi { value } => *value,
            IndicatorValue::Stochastic { percent_k, .. } => *percent_k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub value: IndicatorValue,
    /// Periods the calculator ran with, kept for audit.
    pub periods: BTreeMap<String, u32>,
}

/// All snapshots computed for one (symbol, timeframe, candle) cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    entries: BTreeMap<IndicatorKind, IndicatorSnapshot>,
}

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snapshot: IndicatorSnapshot) {
        self.entries.insert(snapshot.value.kind(), snapshot);
    }

    pub fn get(&self, kind: IndicatorKind) -> Option<&IndicatorSnapshot> {
        self.entries.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndicatorKind, &IndicatorSnapshot)> {
        self.entries.iter()
    }

    /// Flattens every field into "kind.field" keys, the shape stored on
    /// decisions as the audit feature snapshot.
    pub fn flatten(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for snapshot in self.entries.values() {
            match snapshot.value {
                IndicatorValue::Macd {
                    macd,
                    signal,
                    histogram,
                } => {
                    out.insert("macd.macd".to_string(), macd);
                    out.insert("macd.signal".to_string(), signal);
                    out.insert("macd.histogram".to_string(), histogram);
                }
                IndicatorValue::Rsi { value } => {
                    out.insert("rsi.value".to_string(), value);
                }
                IndicatorValue::Stochastic {
                    percent_k,
                    percent_d,
                } => {
                    out.insert("stochastic.percent_k".to_string(), percent_k);
                    out.insert("stochastic.percent_d".to_string(), percent_d);
                }
            }
        }
        out
    }
}
