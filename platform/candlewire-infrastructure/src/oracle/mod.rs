//! HTTP decision oracle client. One attempt per call; retries and circuit
//! breaking belong to the caller's resilience guard. A response that fails
//! shape validation is a [`ClientError::Parse`] so the pipeline can fall
//! back to an auditable Hold.

use async_trait::async_trait;
use candlewire_domain::repositories::{ClientError, DecisionOracle, OracleContext};
use candlewire_domain::value_objects::decision::{TradeAction, TradeDecision};
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};

pub struct HttpDecisionOracle {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WireDecision {
    action: String,
    #[serde(default)]
    quantity: Option<f64>,
    #[serde(default)]
    quantity_percent: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

impl HttpDecisionOracle {
    pub fn new(url: String, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| format!("failed to build http client: {err}"))?;
        Ok(Self {
            url,
            timeout,
            client,
        })
    }
}

fn decision_from_wire(wire: WireDecision, context: &OracleContext) -> Result<TradeDecision, String> {
    let action = match wire.action.to_lowercase().as_str() {
        "buy" => TradeAction::Buy,
        "sell" => TradeAction::Sell,
        "hold" => TradeAction::Hold,
        other => return Err(format!("invalid action: {other}")),
    };
    let confidence = wire.confidence.unwrap_or(0.0);
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(format!("invalid confidence: {confidence}"));
    }
    for (name, value) in [
        ("quantity", wire.quantity),
        ("quantity_percent", wire.quantity_percent),
        ("stop_loss", wire.stop_loss),
        ("take_profit", wire.take_profit),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("invalid {name}: {v}"));
            }
        }
    }

    let candle_timestamp = context
        .candles
        .last()
        .map(|c| c.timestamp)
        .unwrap_or_else(Utc::now);
    let mut decision =
        TradeDecision::new(&context.symbol, context.timeframe, candle_timestamp, action);
    decision.quantity = wire.quantity;
    decision.quantity_percent = wire.quantity_percent;
    decision.stop_loss = wire.stop_loss;
    decision.take_profit = wire.take_profit;
    decision.confidence = confidence;
    decision.rationale = wire.rationale.unwrap_or_default();
    decision.features = context.indicators.flatten();
    Ok(decision)
}

#[async_trait]
impl DecisionOracle for HttpDecisionOracle {
    async fn decide(&self, context: &OracleContext) -> Result<TradeDecision, ClientError> {
        let endpoint = format!("{}/v1/decide", self.url.trim_end_matches('/'));
        let started = Instant::now();
        let response = match self.client.post(&endpoint).json(context).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                metrics::counter!("candlewire.infra.oracle.calls_total", "result" => "err")
                    .increment(1);
                return Err(ClientError::Timeout(format!(
                    "oracle request exceeded {}ms",
                    self.timeout.as_millis()
                )));
            }
            Err(err) => {
                metrics::counter!("candlewire.infra.oracle.calls_total", "result" => "err")
                    .increment(1);
                return Err(ClientError::Network(format!("oracle request failed: {err}")));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            metrics::counter!("candlewire.infra.oracle.calls_total", "result" => "err")
                .increment(1);
            let message = format!("oracle http error: status {}", status.as_u16());
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ClientError::Network(message));
            }
            return Err(ClientError::Rejected(message));
        }

        let wire = response.json::<WireDecision>().await.map_err(|err| {
            ClientError::Parse(format!("failed to parse oracle response: {err}"))
        })?;
        let decision = decision_from_wire(wire, context).map_err(ClientError::Parse)?;

        metrics::counter!("candlewire.infra.oracle.calls_total", "result" => "ok").increment(1);
        metrics::histogram!("candlewire.infra.oracle.request_ms")
            .record(started.elapsed().as_millis() as f64);
        tracing::debug!(
            symbol = %context.symbol,
            action = %decision.action,
            confidence = decision.confidence,
            "oracle answered"
        );
        Ok(decision)
    }
}
