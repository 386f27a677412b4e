//! `report`: reprint the summary of a finished run.

use candlewire_infrastructure::artifacts::read_summary_json;
use std::path::Path;

pub fn execute(run_dir: &Path) -> Result<serde_json::Value, String> {
    let summary = read_summary_json(&run_dir.join("summary.json"))?;
    let run_id = summary
        .get("run_id")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(serde_json::json!({
        "status": "ok",
        "mode": "report",
        "run_id": run_id,
        "input_dir": run_dir.display().to_string(),
        "summary": summary,
    }))
}
