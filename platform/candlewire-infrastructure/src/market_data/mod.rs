//! CSV-backed replay feed. Loading canonicalizes the series (sorted, last
//! write wins on duplicate timestamps) and reports what it had to clean up;
//! polling then hands out one bar per call so the pipeline paces replay the
//! same way it would pace a live feed.

use async_trait::async_trait;
use candlewire_domain::repositories::{ClientError, MarketDataClient};
use candlewire_domain::value_objects::candle::Candle;
use candlewire_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

/// What the loader found while canonicalizing a series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub rows_read: usize,
    pub bars_loaded: usize,
    pub duplicates: usize,
    pub out_of_order: usize,
    pub invalid_rows: usize,
    pub gaps: usize,
    pub missing_bars: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub max_gap_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    timestamp_utc: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub struct ReplayFeed {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
    cursor: Mutex<usize>,
}

impl ReplayFeed {
    pub fn from_csv(
        path: &Path,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<(Self, QualityReport), String> {
        let started = Instant::now();
        let file = File::open(path)
            .map_err(|err| format!("failed to open candle CSV {}: {}", path.display(), err))?;
        let mut reader = csv::Reader::from_reader(file);

        let mut by_ts: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        let mut report = QualityReport::default();
        let mut last_seen: Option<DateTime<Utc>> = None;

        for result in reader.deserialize::<CsvRecord>() {
            let record = result.map_err(|err| format!("failed to parse CSV row: {err}"))?;
            report.rows_read += 1;
            let timestamp = parse_timestamp(&record.timestamp_utc)?;

            let candle = Candle {
                symbol: symbol.to_string(),
                timeframe,
                timestamp,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                volume: record.volume,
            };
            if !candle.close.is_finite() || candle.close <= 0.0 || candle.validate().is_err() {
                report.invalid_rows += 1;
                continue;
            }

            if let Some(prev) = last_seen {
                if timestamp < prev {
                    report.out_of_order += 1;
                }
            }
            last_seen = Some(timestamp);

            if by_ts.insert(timestamp, candle).is_some() {
                report.duplicates += 1;
            }
        }

        let candles: Vec<Candle> = by_ts.into_values().collect();
        report.bars_loaded = candles.len();
        report.first_timestamp = candles.first().map(|c| c.timestamp);
        report.last_timestamp = candles.last().map(|c| c.timestamp);

        let step = timeframe.step_seconds().max(1);
        let mut max_gap: Option<i64> = None;
        for pair in candles.windows(2) {
            let diff = (pair[1].timestamp - pair[0].timestamp).num_seconds();
            if diff > step {
                report.gaps += 1;
                report.missing_bars += ((diff - 1) / step) as usize;
                max_gap = Some(max_gap.map_or(diff, |current| current.max(diff)));
            }
        }
        report.max_gap_seconds = max_gap;

        metrics::histogram!("candlewire.infra.feed.load_ms")
            .record(started.elapsed().as_millis() as f64);
        tracing::debug!(
            rows = report.rows_read,
            bars = report.bars_loaded,
            duplicates = report.duplicates,
            gaps = report.gaps,
            out_of_order = report.out_of_order,
            invalid = report.invalid_rows,
            "loaded candle CSV"
        );

        Ok((
            Self {
                symbol: symbol.to_string(),
                timeframe,
                candles,
                cursor: Mutex::new(0),
            },
            report,
        ))
    }

    /// Replay over an already-canonical series; used by tests and fixtures.
    pub fn from_candles(symbol: &str, timeframe: Timeframe, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        Self {
            symbol: symbol.to_string(),
            timeframe,
            candles,
            cursor: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn check_series(&self, symbol: &str, timeframe: Timeframe) -> Result<(), ClientError> {
        if symbol != self.symbol {
            return Err(ClientError::Validation(format!(
                "feed serves {}, not {symbol}",
                self.symbol
            )));
        }
        if timeframe != self.timeframe {
            return Err(ClientError::Validation(format!(
                "feed serves {}, not {timeframe}",
                self.timeframe
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataClient for ReplayFeed {
    async fn get_historical_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ClientError> {
        self.check_series(symbol, timeframe)?;
        Ok(self
            .candles
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn poll_latest_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>, ClientError> {
        self.check_series(symbol, timeframe)?;
        let mut cursor = self.cursor.lock();
        if *cursor >= self.candles.len() {
            return Ok(Vec::new());
        }
        let candle = self.candles[*cursor].clone();
        *cursor += 1;
        Ok(vec![candle])
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64, ClientError> {
        self.check_series(symbol, self.timeframe)?;
        let cursor = *self.cursor.lock();
        if cursor == 0 {
            return Err(ClientError::Validation(format!(
                "no bars delivered yet for {symbol}"
            )));
        }
        Ok(self.candles[cursor - 1].close)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(format!("unsupported timestamp format: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
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
    fn load_reports_duplicates_gaps_and_out_of_order() {
        let path = unique_tmp_path("feed.csv");
        let csv_data = "timestamp_utc,open,high,low,close,volume\n\
2026-01-05T14:30:00Z,400,401,399,400,1000\n\
2026-01-05T14:40:00Z,401,402,400,401,1000\n\
2026-01-05T14:35:00Z,400,401,399,400.5,1000\n\
2026-01-05T14:30:00Z,399,400,398,399,1000\n\
2026-01-05T14:45:00Z,401,402,400,-1,1000\n";
        fs::write(&path, csv_data).unwrap();

        let (feed, report) = ReplayFeed::from_csv(&path, "SPY", Timeframe::Min5).unwrap();
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.bars_loaded, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.out_of_order, 2);
        assert_eq!(report.invalid_rows, 1);
        assert_eq!(report.gaps, 0);
        assert_eq!(feed.len(), 3);

        // Last write wins on the duplicated timestamp.
        assert!((feed.candles[0].close - 399.0).abs() < 1e-9);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn load_counts_missing_bars_in_gaps() {
        let path = unique_tmp_path("gaps.csv");
        let csv_data = "timestamp_utc,open,high,low,close,volume\n\
2026-01-05T14:30:00Z,400,401,399,400,1000\n\
2026-01-05T14:50:00Z,401,402,400,401,1000\n";
        fs::write(&path, csv_data).unwrap();

        let (_, report) = ReplayFeed::from_csv(&path, "SPY", Timeframe::Min5).unwrap();
        assert_eq!(report.gaps, 1);
        assert_eq!(report.missing_bars, 3);
        assert_eq!(report.max_gap_seconds, Some(1_200));
        fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn poll_drains_one_bar_at_a_time_then_goes_quiet() {
        let base = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let candles: Vec<Candle> = (0..3)
            .map(|i| Candle {
                symbol: "SPY".to_string(),
                timeframe: Timeframe::Min5,
                timestamp: base + chrono::Duration::minutes(5 * i),
                open: 400.0,
                high: 401.0,
                low: 399.0,
                close: 400.0 + i as f64,
                volume: 1_000.0,
            })
            .collect();
        let feed = ReplayFeed::from_candles("SPY", Timeframe::Min5, candles);

        assert!(feed.get_current_price("SPY").await.is_err());
        for i in 0..3 {
            let batch = feed.poll_latest_bars("SPY", Timeframe::Min5).await.unwrap();
            assert_eq!(batch.len(), 1);
            let price = feed.get_current_price("SPY").await.unwrap();
            assert!((price - (400.0 + i as f64)).abs() < 1e-9);
        }
        assert!(feed
            .poll_latest_bars("SPY", Timeframe::Min5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn wrong_symbol_or_timeframe_is_a_validation_error() {
        let feed = ReplayFeed::from_candles("SPY", Timeframe::Min5, Vec::new());
        let err = feed.poll_latest_bars("QQQ", Timeframe::Min5).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        let err = feed.poll_latest_bars("SPY", Timeframe::Min1).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }
}
