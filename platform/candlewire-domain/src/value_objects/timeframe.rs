use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "1m" | "1min" => Ok(Timeframe::Min1),
            "5m" | "5min" => Ok(Timeframe::Min5),
            "15m" | "15min" => Ok(Timeframe::Min15),
            "1h" | "1hour" => Ok(Timeframe::Hour1),
            "1d" | "1day" => Ok(Timeframe::Day1),
            _ => Err(format!("unsupported timeframe: {value}")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn step_seconds(&self) -> i64 {
        match self {
            Timeframe::Min1 => 60,
            Timeframe::Min5 => 300,
            Timeframe::Min15 => 900,
            Timeframe::Hour1 => 3_600,
            Timeframe::Day1 => 86_400,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.step_seconds())
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
