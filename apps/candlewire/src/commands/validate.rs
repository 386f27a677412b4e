//! `validate`: load everything a run would load, trade nothing, report what
//! was found. Any problem fails the command.

use candlewire_application::config::{load_config, Config, OracleMode};
use candlewire_domain::entities::strategy::Strategy;
use candlewire_infrastructure::market_data::ReplayFeed;
use candlewire_infrastructure::persistence::strategy_file::load_strategies;
use std::path::{Path, PathBuf};

pub fn execute(config_flag: Option<PathBuf>) -> Result<serde_json::Value, String> {
    let config_path = super::resolve_config_path(config_flag)?;
    let config = load_config(&config_path)?;

    let mut problems: Vec<String> = Vec::new();

    let timeframe = match config.parsed_timeframe() {
        Ok(timeframe) => Some(timeframe),
        Err(err) => {
            problems.push(err);
            None
        }
    };
    if config.run.initial_capital <= 0.0 {
        problems.push("run.initial_capital must be positive".to_string());
    }
    if config.trading.default_order_percent <= 0.0 {
        problems.push("trading.default_order_percent must be positive".to_string());
    }
    if let Err(err) = config.poll_interval() {
        problems.push(err);
    }
    if let Some(section) = &config.oracle {
        if section.mode == OracleMode::Remote
            && section.url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            problems.push("oracle.url is required when oracle.mode = \"remote\"".to_string());
        }
    }

    let strategies = match config.paths.strategies_path.as_deref() {
        Some(path) => match load_strategies(Path::new(path)) {
            Ok(strategies) => strategies,
            Err(err) => {
                problems.push(err);
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    if let Some(timeframe) = timeframe {
        for strategy in &strategies {
            if strategy.timeframe != timeframe {
                problems.push(format!(
                    "strategy '{}' targets {}, run timeframe is {}",
                    strategy.name, strategy.timeframe, timeframe
                ));
            }
        }
    }

    let data = match (config.paths.data_path.as_deref(), timeframe) {
        (Some(path), Some(timeframe)) => {
            match ReplayFeed::from_csv(Path::new(path), &config.run.symbol, timeframe) {
                Ok((feed, quality)) => Some(serde_json::json!({
                    "path": path,
                    "bars": feed.len(),
                    "quality": quality,
                })),
                Err(err) => {
                    problems.push(err);
                    None
                }
            }
        }
        (None, _) => {
            problems.push("paths.data_path is required to run the pipeline".to_string());
            None
        }
        _ => None,
    };

    if !problems.is_empty() {
        return Err(format!("validation failed: {}", problems.join("; ")));
    }

    Ok(serde_json::json!({
        "status": "ok",
        "mode": "validate",
        "config": config_path.display().to_string(),
        "symbol": config.run.symbol,
        "timeframe": config.run.timeframe,
        "trading_mode": config.trading.mode,
        "oracle": oracle_label(&config),
        "strategies": strategies.iter().map(strategy_row).collect::<Vec<_>>(),
        "data": data,
    }))
}

fn oracle_label(config: &Config) -> &'static str {
    match config.oracle.as_ref().map(|section| section.mode) {
        Some(OracleMode::Remote) => "remote",
        _ => "off",
    }
}

fn strategy_row(strategy: &Strategy) -> serde_json::Value {
    serde_json::json!({
        "name": strategy.name,
        "enabled": strategy.enabled,
        "timeframe": strategy.timeframe,
        "alerts": strategy.alerts.len(),
        "conditions": strategy.conditions.len(),
        "action": strategy.final_action,
    })
}
