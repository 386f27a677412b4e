//! Run artifacts under `<out_dir>/<run_id>/`: the full event stream as
//! JSONL, decisions as CSV, a summary JSON, and the raw config snapshot.

use candlewire_domain::events::EventEnvelope;
use candlewire_domain::repositories::EventSink;
use candlewire_domain::value_objects::decision::TradeDecision;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn create(out_dir: &Path, run_id: &str) -> Result<Self, String> {
        let root = out_dir.join(run_id);
        fs::create_dir_all(&root)
            .map_err(|err| format!("failed to create run dir {}: {}", root.display(), err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn decisions_path(&self) -> PathBuf {
        self.root.join("decisions.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    pub fn config_snapshot_path(&self) -> PathBuf {
        self.root.join("config_snapshot.toml")
    }
}

/// Append-only JSONL sink; one envelope per line, flushed per append so a
/// killed run still leaves a usable audit trail.
pub struct JsonlEventSink {
    file: Mutex<File>,
}

impl JsonlEventSink {
    pub fn create(path: &Path) -> Result<Self, String> {
        let file = File::create(path)
            .map_err(|err| format!("failed to create event log {}: {}", path.display(), err))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for JsonlEventSink {
    fn append(&self, envelope: &EventEnvelope) -> Result<(), String> {
        let line = envelope.to_json_line()?;
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .map_err(|err| format!("failed to write event: {err}"))
    }
}

pub fn write_decisions_csv(path: &Path, decisions: &[TradeDecision]) -> Result<(), String> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|err| format!("failed to create decisions csv {}: {}", path.display(), err))?;
    wtr.write_record([
        "decision_id",
        "symbol",
        "timeframe",
        "candle_timestamp",
        "action",
        "quantity",
        "quantity_percent",
        "stop_loss",
        "take_profit",
        "confidence",
        "rationale",
    ])
    .map_err(|err| format!("failed to write decisions csv header: {err}"))?;

    for decision in decisions {
        wtr.write_record([
            decision.id.to_string(),
            decision.symbol.clone(),
            decision.timeframe.label().to_string(),
            decision.candle_timestamp.to_rfc3339(),
            decision.action.to_string(),
            optional(decision.quantity),
            optional(decision.quantity_percent),
            optional(decision.stop_loss),
            optional(decision.take_profit),
            decision.confidence.to_string(),
            decision.rationale.clone(),
        ])
        .map_err(|err| format!("failed to write decisions row: {err}"))?;
    }

    wtr.flush()
        .map_err(|err| format!("failed to flush decisions csv: {err}"))
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_summary_json(path: &Path, summary: &serde_json::Value) -> Result<(), String> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|err| format!("failed to serialize summary: {err}"))?;
    fs::write(path, json)
        .map_err(|err| format!("failed to write summary {}: {}", path.display(), err))
}

pub fn read_summary_json(path: &Path) -> Result<serde_json::Value, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read summary {}: {}", path.display(), err))?;
    serde_json::from_str(&raw).map_err(|err| format!("failed to parse summary: {err}"))
}

pub fn write_config_snapshot(path: &Path, contents: &str) -> Result<(), String> {
    fs::write(path, contents).map_err(|err| {
        format!(
            "failed to write config snapshot {}: {}",
            path.display(),
            err
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewire_domain::events::PipelineEvent;
    use candlewire_domain::value_objects::decision::TradeAction;
    use candlewire_domain::value_objects::timeframe::Timeframe;
    use chrono::{TimeZone, Utc};
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    fn unique_tmp_dir(name: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("candlewire_{name}_{}_{}", std::process::id(), now))
    }

    #[test]
    fn run_dir_lays_out_the_artifact_paths() {
        let out = unique_tmp_dir("runs");
        let run = RunDir::create(&out, "spy_5m_test").unwrap();
        assert!(run.root().exists());
        assert!(run.events_path().ends_with("spy_5m_test/events.jsonl"));
        assert!(run.summary_path().ends_with("spy_5m_test/summary.json"));
        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn sink_appends_one_line_per_event() {
        let out = unique_tmp_dir("sink");
        fs::create_dir_all(&out).unwrap();
        let path = out.join("events.jsonl");
        let sink = JsonlEventSink::create(&path).unwrap();

        for reason in ["first", "second"] {
            let envelope = EventEnvelope::new(
                Uuid::new_v4(),
                PipelineEvent::TradeRejected {
                    decision_id: Uuid::new_v4(),
                    symbol: "SPY".to_string(),
                    reason: reason.to_string(),
                },
            );
            sink.append(&envelope).unwrap();
        }

        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("first"));
        assert!(lines[1].contains("second"));
        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn decisions_csv_includes_empty_cells_for_missing_sizing() {
        let out = unique_tmp_dir("decisions");
        fs::create_dir_all(&out).unwrap();
        let path = out.join("decisions.csv");

        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let mut sized = TradeDecision::new("SPY", Timeframe::Min5, t0, TradeAction::Buy);
        sized.quantity = Some(5.0);
        sized.confidence = 1.0;
        sized.rationale = "dip buyer: rsi falls_below 35".to_string();
        let unsized_decision = TradeDecision::new("SPY", Timeframe::Min5, t0, TradeAction::Hold);

        write_decisions_csv(&path, &[sized, unsized_decision]).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("decision_id,symbol,timeframe"));
        assert!(lines[1].contains("buy,5,"));
        assert!(lines[2].contains("hold,,"));
        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn summary_round_trips() {
        let out = unique_tmp_dir("summary");
        fs::create_dir_all(&out).unwrap();
        let path = out.join("summary.json");

        let summary = serde_json::json!({
            "run_id": "spy_5m_test",
            "events": {"candles_closed": 3},
        });
        write_summary_json(&path, &summary).unwrap();
        let loaded = read_summary_json(&path).unwrap();
        assert_eq!(loaded, summary);
        fs::remove_dir_all(&out).ok();
    }
}
