use candlewire_domain::entities::risk::RiskLimits;
use candlewire_domain::services::indicators::IndicatorPeriods;
use candlewire_domain::value_objects::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Approved decisions wait for a human; the pipeline emits ActionRequired.
    Ask,
    /// Approved decisions go straight to execution, approver "System".
    Auto,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleMode {
    Off,
    Remote,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub paths: PathsConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub indicators: Option<IndicatorsConfig>,
    pub oracle: Option<OracleConfig>,
    pub resilience: Option<ResilienceConfig>,
    pub pipeline: Option<PipelineConfig>,
    pub broker: Option<BrokerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: Option<String>,
    pub symbol: String,
    pub timeframe: String,
    pub initial_capital: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// CSV candle file for replay runs; live runs leave it unset.
    pub data_path: Option<String>,
    /// JSON array of strategies; unset runs with the oracle alone.
    pub strategies_path: Option<String>,
    pub out_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TradingConfig {
    pub enabled: bool,
    pub mode: TradingMode,
    /// Percent of equity to request when a decision carries no size.
    pub default_order_percent: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    pub max_position_percent: f64,
    pub max_open_positions: usize,
    pub max_daily_loss_percent: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IndicatorsConfig {
    pub macd_fast: Option<usize>,
    pub macd_slow: Option<usize>,
    pub macd_signal: Option<usize>,
    pub rsi_period: Option<usize>,
    pub stochastic_k: Option<usize>,
    pub stochastic_smoothing: Option<usize>,
    pub stochastic_d: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    pub mode: OracleMode,
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub call_timeout_ms: Option<u64>,
    pub failure_ratio: Option<f64>,
    pub sampling_window_ms: Option<u64>,
    pub minimum_throughput: Option<u32>,
    pub break_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub fee_bps: Option<f64>,
    pub slippage_bps: Option<f64>,
    pub jitter_bps: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub poll_interval_ms: Option<u64>,
    /// Divides the timeframe step when replaying a file, 0 = no pacing.
    pub replay_scale: Option<u64>,
    /// Replay runs stop after this many consecutive empty polls.
    pub idle_shutdown_polls: Option<u32>,
    pub candle_lookback: Option<usize>,
}

/// Concrete resilience knobs after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResilienceSettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub call_timeout: Duration,
    pub failure_ratio: f64,
    pub sampling_window: Duration,
    pub minimum_throughput: u32,
    pub break_duration: Duration,
}

/// Paper fill frictions in basis points; zero means a frictionless fill.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BrokerSettings {
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub jitter_bps: f64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(5),
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(30),
            minimum_throughput: 10,
            break_duration: Duration::from_secs(15),
        }
    }
}

impl Config {
    pub fn parsed_timeframe(&self) -> Result<Timeframe, String> {
        Timeframe::parse(&self.run.timeframe)
    }

    /// Explicit run id, or a generated `symbol_timeframe_timestamp_hash` one.
    pub fn resolved_run_id(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        if let Some(run_id) = &self.run.run_id {
            if !run_id.trim().is_empty() {
                return run_id.clone();
            }
        }
        let stamp = now.format("%Y%m%d%H%M%S");
        let mut hasher = Sha256::new();
        hasher.update(self.run.symbol.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.run.timeframe.as_bytes());
        hasher.update(b"\n");
        hasher.update(stamp.to_string().as_bytes());
        let digest = hasher.finalize();
        format!(
            "{}_{}_{}_{}",
            self.run.symbol.to_lowercase(),
            self.run.timeframe,
            stamp,
            to_hex_short(&digest[..], 8)
        )
    }

    pub fn indicator_periods(&self) -> IndicatorPeriods {
        let defaults = IndicatorPeriods::default();
        let Some(section) = &self.indicators else {
            return defaults;
        };
        IndicatorPeriods {
            macd_fast: section.macd_fast.unwrap_or(defaults.macd_fast),
            macd_slow: section.macd_slow.unwrap_or(defaults.macd_slow),
            macd_signal: section.macd_signal.unwrap_or(defaults.macd_signal),
            rsi_period: section.rsi_period.unwrap_or(defaults.rsi_period),
            stochastic_k: section.stochastic_k.unwrap_or(defaults.stochastic_k),
            stochastic_smoothing: section
                .stochastic_smoothing
                .unwrap_or(defaults.stochastic_smoothing),
            stochastic_d: section.stochastic_d.unwrap_or(defaults.stochastic_d),
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_percent: self.risk.max_position_percent,
            max_open_positions: self.risk.max_open_positions,
            max_daily_loss_percent: self.risk.max_daily_loss_percent,
        }
    }

    pub fn resilience_settings(&self) -> ResilienceSettings {
        let defaults = ResilienceSettings::default();
        let Some(section) = &self.resilience else {
            return defaults;
        };
        ResilienceSettings {
            max_attempts: section.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: section
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: section
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff_multiplier: section
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            call_timeout: section
                .call_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
            failure_ratio: section.failure_ratio.unwrap_or(defaults.failure_ratio),
            sampling_window: section
                .sampling_window_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sampling_window),
            minimum_throughput: section
                .minimum_throughput
                .unwrap_or(defaults.minimum_throughput),
            break_duration: section
                .break_duration_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.break_duration),
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        let Some(section) = &self.broker else {
            return BrokerSettings::default();
        };
        BrokerSettings {
            fee_bps: section.fee_bps.unwrap_or(0.0),
            slippage_bps: section.slippage_bps.unwrap_or(0.0),
            jitter_bps: section.jitter_bps.unwrap_or(0.0),
        }
    }

    pub fn poll_interval(&self) -> Result<Duration, String> {
        if let Some(ms) = self.pipeline.as_ref().and_then(|p| p.poll_interval_ms) {
            return Ok(Duration::from_millis(ms));
        }
        let step = self.parsed_timeframe()?.step_seconds();
        let scale = self
            .pipeline
            .as_ref()
            .and_then(|p| p.replay_scale)
            .unwrap_or(0);
        if scale == 0 {
            // Live pacing: poll once per timeframe step.
            return Ok(Duration::from_secs(step.max(1) as u64));
        }
        Ok(Duration::from_millis(
            ((step.max(1) as u64) * 1_000 / scale).max(1),
        ))
    }

    pub fn idle_shutdown_polls(&self) -> Option<u32> {
        self.pipeline.as_ref().and_then(|p| p.idle_shutdown_polls)
    }

    /// Candles fetched per evaluation; enough for the slowest indicator.
    pub fn candle_lookback(&self) -> usize {
        self.pipeline
            .as_ref()
            .and_then(|p| p.candle_lookback)
            .unwrap_or(120)
    }
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}

fn to_hex_short(bytes: &[u8], chars: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(chars);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        if out.len() >= chars {
            break;
        }
        out.push(HEX[(b & 0x0f) as usize] as char);
        if out.len() >= chars {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse_config(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("config should parse")
    }

    fn minimal() -> &'static str {
        r#"
[run]
symbol = "SPY"
timeframe = "5m"
initial_capital = 100000.0

[paths]
data_path = "data/spy_5m.csv"
out_dir = "runs/"

[trading]
enabled = true
mode = "auto"
default_order_percent = 5.0

[risk]
max_position_percent = 10.0
max_open_positions = 5
max_daily_loss_percent = 3.0
"#
    }

    #[test]
    fn parse_minimal_config() {
        let config = parse_config(minimal());
        assert_eq!(config.run.symbol, "SPY");
        assert_eq!(config.trading.mode, TradingMode::Auto);
        assert_eq!(config.parsed_timeframe().unwrap(), Timeframe::Min5);
        assert_eq!(config.indicator_periods().macd_slow, 26);
        assert_eq!(config.resilience_settings(), ResilienceSettings::default());
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let toml_str = format!("{}\nunknown_field = 123\n", minimal());
        let err = toml::from_str::<Config>(&toml_str).expect_err("unknown field should fail");
        assert!(err.to_string().to_lowercase().contains("unknown field"));
    }

    #[test]
    fn parse_config_rejects_malformed_toml() {
        let err = toml::from_str::<Config>("[run\nsymbol = 1").expect_err("malformed");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn overrides_flow_through_resolvers() {
        let toml_str = format!(
            "{}\n[indicators]\nrsi_period = 21\n\n[resilience]\nmax_attempts = 5\nbreak_duration_ms = 1000\n",
            minimal()
        );
        let config = parse_config(&toml_str);
        let periods = config.indicator_periods();
        assert_eq!(periods.rsi_period, 21);
        assert_eq!(periods.macd_fast, 12);
        let settings = config.resilience_settings();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.break_duration, Duration::from_millis(1000));
        assert_eq!(settings.failure_ratio, 0.5);
    }

    #[test]
    fn run_id_is_generated_when_absent() {
        let config = parse_config(minimal());
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let run_id = config.resolved_run_id(now);
        assert!(run_id.starts_with("spy_5m_20260105143000_"));
        assert_eq!(run_id.len(), "spy_5m_20260105143000_".len() + 8);
        // Stable for the same inputs.
        assert_eq!(run_id, config.resolved_run_id(now));
    }

    #[test]
    fn explicit_run_id_wins() {
        let toml_str = minimal().replace("[run]", "[run]\nrun_id = \"my_run\"");
        let config = parse_config(&toml_str);
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        assert_eq!(config.resolved_run_id(now), "my_run");
    }

    #[test]
    fn broker_frictions_default_to_zero() {
        let config = parse_config(minimal());
        assert_eq!(config.broker_settings(), BrokerSettings::default());
        assert!(config.paths.strategies_path.is_none());

        let toml_str = format!(
            "{}\n[broker]\nfee_bps = 1.0\nslippage_bps = 2.0\n",
            minimal()
        );
        let settings = parse_config(&toml_str).broker_settings();
        assert_eq!(settings.fee_bps, 1.0);
        assert_eq!(settings.slippage_bps, 2.0);
        assert_eq!(settings.jitter_bps, 0.0);
    }

    #[test]
    fn poll_interval_scales_with_replay() {
        let toml_str = format!("{}\n[pipeline]\nreplay_scale = 60\n", minimal());
        let config = parse_config(&toml_str);
        // 5m step / 60 = 5s.
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(5));

        let config = parse_config(minimal());
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(300));
    }
}
