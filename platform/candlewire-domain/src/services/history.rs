//! Rolling two-deep indicator history keyed by symbol, timeframe and kind.
//!
//! Crossing alerts compare the latest snapshot against the one before it, so
//! the store only ever keeps `current` and `previous`. Entries untouched for
//! longer than the TTL are treated as absent and dropped on next access.

use crate::value_objects::indicator::{IndicatorKind, IndicatorSnapshot};
use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub indicator: IndicatorKind,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    current: IndicatorSnapshot,
    previous: Option<IndicatorSnapshot>,
    touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IndicatorHistory {
    ttl: Duration,
    entries: HashMap<HistoryKey, HistoryEntry>,
}

impl IndicatorHistory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::hours(DEFAULT_TTL_HOURS))
    }

    /// Records a snapshot, rotating the previous one down a slot.
    ///
    /// Re-recording the same candle timestamp replaces `current` in place
    /// without rotation, so reprocessing a bar cannot fabricate a crossing.
    pub fn record(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        snapshot: IndicatorSnapshot,
        now: DateTime<Utc>,
    ) {
        let key = HistoryKey {
            symbol: symbol.to_string(),
            timeframe,
            indicator: snapshot.value.kind(),
        };
        match self.entries.get_mut(&key) {
            Some(entry) if now - entry.touched_at <= self.ttl => {
                if entry.current.timestamp == snapshot.timestamp {
                    entry.current = snapshot;
                } else {
                    entry.previous = Some(std::mem::replace(&mut entry.current, snapshot));
                }
                entry.touched_at = now;
            }
            _ => {
                self.entries.insert(
                    key,
                    HistoryEntry {
                        current: snapshot,
                        previous: None,
                        touched_at: now,
                    },
                );
            }
        }
    }

    pub fn current(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        indicator: IndicatorKind,
        now: DateTime<Utc>,
    ) -> Option<&IndicatorSnapshot> {
        self.live_entry(symbol, timeframe, indicator, now)
            .map(|entry| &entry.current)
    }

    pub fn previous(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        indicator: IndicatorKind,
        now: DateTime<Utc>,
    ) -> Option<&IndicatorSnapshot> {
        self.live_entry(symbol, timeframe, indicator, now)
            .and_then(|entry| entry.previous.as_ref())
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.touched_at <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_entry(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        indicator: IndicatorKind,
        now: DateTime<Utc>,
    ) -> Option<&HistoryEntry> {
        let key = HistoryKey {
            symbol: symbol.to_string(),
            timeframe,
            indicator,
        };
        self.entries
            .get(&key)
            .filter(|entry| now - entry.touched_at <= self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::indicator::IndicatorValue;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn rsi_snapshot(at: DateTime<Utc>, value: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            timestamp: at,
            value: IndicatorValue::Rsi { value },
            periods: BTreeMap::new(),
        }
    }

    fn rsi_value(snapshot: &IndicatorSnapshot) -> f64 {
        match snapshot.value {
            IndicatorValue::Rsi { value } => value,
            _ => panic!("expected rsi"),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap()
    }

    #[test]
    fn second_record_rotates_first_into_previous() {
        let mut history = IndicatorHistory::with_default_ttl();
        let now = t0();
        history.record("SPY", Timeframe::Min5, rsi_snapshot(now, 40.0), now);
        assert!(history
            .previous("SPY", Timeframe::Min5, IndicatorKind::Rsi, now)
            .is_none());

        let later = now + Duration::minutes(5);
        history.record("SPY", Timeframe::Min5, rsi_snapshot(later, 55.0), later);

        let current = history
            .current("SPY", Timeframe::Min5, IndicatorKind::Rsi, later)
            .unwrap();
        let previous = history
            .previous("SPY", Timeframe::Min5, IndicatorKind::Rsi, later)
            .unwrap();
        assert_eq!(rsi_value(current), 55.0);
        assert_eq!(rsi_value(previous), 40.0);
    }

    #[test]
    fn re_recording_the_same_candle_does_not_rotate() {
        let mut history = IndicatorHistory::with_default_ttl();
        let now = t0();
        let later = now + Duration::minutes(5);
        history.record("SPY", Timeframe::Min5, rsi_snapshot(now, 40.0), now);
        history.record("SPY", Timeframe::Min5, rsi_snapshot(later, 55.0), later);

        // Same candle timestamp delivered again, slightly different value.
        history.record("SPY", Timeframe::Min5, rsi_snapshot(later, 56.0), later);

        let current = history
            .current("SPY", Timeframe::Min5, IndicatorKind::Rsi, later)
            .unwrap();
        let previous = history
            .previous("SPY", Timeframe::Min5, IndicatorKind::Rsi, later)
            .unwrap();
        assert_eq!(rsi_value(current), 56.0);
        assert_eq!(rsi_value(previous), 40.0);
    }

    #[test]
    fn entries_expire_after_the_ttl() {
        let mut history = IndicatorHistory::with_default_ttl();
        let now = t0();
        history.record("SPY", Timeframe::Min5, rsi_snapshot(now, 40.0), now);

        let stale = now + Duration::hours(25);
        assert!(history
            .current("SPY", Timeframe::Min5, IndicatorKind::Rsi, stale)
            .is_none());
        assert!(history
            .previous("SPY", Timeframe::Min5, IndicatorKind::Rsi, stale)
            .is_none());
    }

    #[test]
    fn recording_over_an_expired_entry_starts_fresh() {
        let mut history = IndicatorHistory::with_default_ttl();
        let now = t0();
        history.record("SPY", Timeframe::Min5, rsi_snapshot(now, 40.0), now);

        let stale = now + Duration::hours(25);
        history.record("SPY", Timeframe::Min5, rsi_snapshot(stale, 70.0), stale);

        // The pre-expiry snapshot must not resurface as `previous`.
        assert!(history
            .previous("SPY", Timeframe::Min5, IndicatorKind::Rsi, stale)
            .is_none());
        let current = history
            .current("SPY", Timeframe::Min5, IndicatorKind::Rsi, stale)
            .unwrap();
        assert_eq!(rsi_value(current), 70.0);
    }

    #[test]
    fn purge_drops_only_stale_keys() {
        let mut history = IndicatorHistory::with_default_ttl();
        let now = t0();
        history.record("SPY", Timeframe::Min5, rsi_snapshot(now, 40.0), now);
        let later = now + Duration::hours(20);
        history.record("QQQ", Timeframe::Min5, rsi_snapshot(later, 60.0), later);

        let check = now + Duration::hours(25);
        history.purge_expired(check);
        assert_eq!(history.len(), 1);
        assert!(history
            .current("QQQ", Timeframe::Min5, IndicatorKind::Rsi, check)
            .is_some());
    }
}
