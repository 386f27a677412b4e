//! Command implementations. Each returns the status document that main
//! prints as a single JSON line.

pub mod report;
pub mod run;
pub mod validate;

use std::path::PathBuf;

/// Explicit `--config` wins; otherwise env CANDLEWIRE_CONFIG.
pub fn resolve_config_path(flag: Option<PathBuf>) -> Result<PathBuf, String> {
    flag.or_else(|| {
        std::env::var("CANDLEWIRE_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    })
    .ok_or_else(|| "missing --config and env CANDLEWIRE_CONFIG is not set".to_string())
}
