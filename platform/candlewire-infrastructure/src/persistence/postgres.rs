//! Postgres candle store. The natural key is the primary key and inserts use
//! `ON CONFLICT ... DO NOTHING`, so `upsert` reports whether the row was new
//! the same way the in-memory store does.

use async_trait::async_trait;
use candlewire_domain::repositories::CandleRepository;
use candlewire_domain::value_objects::candle::Candle;
use candlewire_domain::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use tokio_postgres::NoTls;

pub struct PostgresCandleRepository {
    client: tokio_postgres::Client,
    table: String,
}

impl PostgresCandleRepository {
    pub async fn connect(db_url: &str, table: &str) -> Result<Self, String> {
        validate_table_name(table)
            .map_err(|err| format!("invalid candle table '{table}': {err}"))?;
        let (client, connection) = tokio_postgres::connect(db_url, NoTls)
            .await
            .map_err(|err| format!("failed to connect to postgres: {err}"))?;
        // The connection future drives I/O for the client until either side
        // closes.
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection closed");
            }
        });
        Ok(Self {
            client,
            table: table.to_string(),
        })
    }

    pub async fn ensure_schema(&self) -> Result<(), String> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             symbol TEXT NOT NULL, \
             timeframe TEXT NOT NULL, \
             timestamp_utc TIMESTAMPTZ NOT NULL, \
             open DOUBLE PRECISION NOT NULL, \
             high DOUBLE PRECISION NOT NULL, \
             low DOUBLE PRECISION NOT NULL, \
             close DOUBLE PRECISION NOT NULL, \
             volume DOUBLE PRECISION NOT NULL, \
             PRIMARY KEY (symbol, timeframe, timestamp_utc))",
            self.table
        );
        self.client
            .batch_execute(&ddl)
            .await
            .map_err(|err| format!("failed to ensure candle schema: {err}"))
    }

    fn row_to_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        row: &tokio_postgres::Row,
    ) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            timestamp: row.get(0),
            open: row.get(1),
            high: row.get(2),
            low: row.get(3),
            close: row.get(4),
            volume: row.get(5),
        }
    }
}

#[async_trait]
impl CandleRepository for PostgresCandleRepository {
    async fn upsert(&self, candle: &Candle) -> Result<bool, String> {
        let sql = format!(
            "INSERT INTO {} (symbol, timeframe, timestamp_utc, open, high, low, close, volume) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (symbol, timeframe, timestamp_utc) DO NOTHING",
            self.table
        );
        let inserted = self
            .client
            .execute(
                &sql,
                &[
                    &candle.symbol,
                    &candle.timeframe.label(),
                    &candle.timestamp,
                    &candle.open,
                    &candle.high,
                    &candle.low,
                    &candle.close,
                    &candle.volume,
                ],
            )
            .await
            .map_err(|err| format!("failed to upsert candle: {err}"))?;
        Ok(inserted == 1)
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, String> {
        let sql = format!(
            "SELECT timestamp_utc, open, high, low, close, volume FROM {} \
             WHERE symbol = $1 AND timeframe = $2 \
             AND timestamp_utc >= $3 AND timestamp_utc <= $4 \
             ORDER BY timestamp_utc ASC",
            self.table
        );
        let rows = self
            .client
            .query(&sql, &[&symbol, &timeframe.label(), &start, &end])
            .await
            .map_err(|err| format!("failed to query candles: {err}"))?;
        Ok(rows
            .iter()
            .map(|row| self.row_to_candle(symbol, timeframe, row))
            .collect())
    }

    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, String> {
        let sql = format!(
            "SELECT timestamp_utc, open, high, low, close, volume FROM {} \
             WHERE symbol = $1 AND timeframe = $2 \
             ORDER BY timestamp_utc DESC LIMIT $3",
            self.table
        );
        let rows = self
            .client
            .query(&sql, &[&symbol, &timeframe.label(), &(limit as i64)])
            .await
            .map_err(|err| format!("failed to query recent candles: {err}"))?;
        let mut candles: Vec<Candle> = rows
            .iter()
            .map(|row| self.row_to_candle(symbol, timeframe, row))
            .collect();
        candles.reverse();
        Ok(candles)
    }
}

fn validate_table_name(table: &str) -> Result<(), String> {
    if table.is_empty() {
        return Err("table name is empty".to_string());
    }
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(format!("invalid table name: {table}"));
    }
    for part in parts {
        let mut chars = part.chars();
        let first = chars
            .next()
            .ok_or_else(|| format!("invalid table name: {table}"))?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(format!("invalid table name: {table}"));
        }
        if !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(format!("invalid table name: {table}"));
        }
    }
    Ok(())
}
