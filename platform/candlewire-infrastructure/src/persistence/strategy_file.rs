//! Strategies load from a JSON file: an array of strategy definitions,
//! checked for structural integrity before any of them reach the pipeline.

use candlewire_domain::entities::strategy::Strategy;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub fn load_strategies(path: &Path) -> Result<Vec<Strategy>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read strategies {}: {}", path.display(), err))?;
    let strategies: Vec<Strategy> = serde_json::from_str(&raw)
        .map_err(|err| format!("failed to parse strategies {}: {}", path.display(), err))?;

    let mut ids = HashSet::new();
    for strategy in &strategies {
        strategy.validate()?;
        if !ids.insert(strategy.id) {
            return Err(format!(
                "duplicate strategy id {} ('{}')",
                strategy.id, strategy.name
            ));
        }
    }
    tracing::debug!(count = strategies.len(), "loaded strategies");
    Ok(strategies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewire_domain::value_objects::decision::TradeAction;
    use candlewire_domain::value_objects::timeframe::Timeframe;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_tmp_path(name: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("candlewire_{name}_{}_{}", std::process::id(), now))
    }

    #[test]
    fn round_trips_a_strategy_file() {
        let strategies = vec![
            Strategy::new("alpha", Timeframe::Min5, TradeAction::Buy),
            Strategy::new("beta", Timeframe::Hour1, TradeAction::Sell),
        ];
        let path = unique_tmp_path("strategies.json");
        fs::write(&path, serde_json::to_string_pretty(&strategies).unwrap()).unwrap();

        let loaded = load_strategies(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "alpha");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_duplicate_strategy_ids() {
        let strategy = Strategy::new("alpha", Timeframe::Min5, TradeAction::Buy);
        let twice = vec![strategy.clone(), strategy];
        let path = unique_tmp_path("dup_strategies.json");
        fs::write(&path, serde_json::to_string(&twice).unwrap()).unwrap();

        let err = load_strategies(&path).unwrap_err();
        assert!(err.contains("duplicate strategy id"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_a_readable_error() {
        let err = load_strategies(Path::new("/nonexistent/strategies.json")).unwrap_err();
        assert!(err.contains("failed to read strategies"));
    }
}
