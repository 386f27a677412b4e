use crate::entities::portfolio::Portfolio;
use crate::value_objects::candle::Candle;
use crate::value_objects::decision::{TradeAction, TradeDecision};
use crate::value_objects::fill::Fill;
use crate::value_objects::indicator::IndicatorSet;
use crate::value_objects::order::{Order, OrderType};
use crate::value_objects::side::Side;
use crate::value_objects::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    CandleClosed {
        symbol: String,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    },
    IndicatorsCalculated {
        symbol: String,
        timeframe: Timeframe,
        candle_timestamp: DateTime<Utc>,
        indicators: IndicatorSet,
    },
    TradeProposed {
        decision: TradeDecision,
    },
    TradeRejected {
        decision_id: Uuid,
        symbol: String,
        reason: String,
    },
    ActionRequired {
        decision_id: Uuid,
        symbol: String,
        action: TradeAction,
        quantity: Option<f64>,
        confidence: f64,
        rationale: String,
        annotations: Vec<String>,
    },
    TradeApproved {
        decision_id: Uuid,
        symbol: String,
        action: TradeAction,
        quantity: Option<f64>,
        stop_loss: Option<f64>,
        approved_by: String,
        approved_at: DateTime<Utc>,
    },
    OrderSubmitted {
        order_id: Uuid,
        client_order_id: String,
        symbol: String,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        limit_price: Option<f64>,
        submitted_at: DateTime<Utc>,
    },
    OrderFilled {
        fill_id: Uuid,
        order_id: Uuid,
        client_order_id: String,
        symbol: String,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
        filled_at: DateTime<Utc>,
    },
    PortfolioUpdated {
        cash: f64,
        equity: f64,
        buying_power: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        position_count: usize,
        as_of: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn candle_closed(candle: &Candle) -> Self {
        PipelineEvent::CandleClosed {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            timestamp: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        }
    }

    pub fn order_submitted(order: &Order) -> Self {
        PipelineEvent::OrderSubmitted {
            order_id: order.id,
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            limit_price: order.limit_price,
            submitted_at: order.submitted_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn order_filled(fill: &Fill) -> Self {
        PipelineEvent::OrderFilled {
            fill_id: fill.id,
            order_id: fill.order_id,
            client_order_id: fill.client_order_id.clone(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            quantity: fill.quantity,
            price: fill.price,
            commission: fill.commission,
            filled_at: fill.filled_at,
        }
    }

    pub fn portfolio_updated(portfolio: &Portfolio) -> Self {
        PipelineEvent::PortfolioUpdated {
            cash: portfolio.cash,
            equity: portfolio.equity,
            buying_power: portfolio.buying_power,
            unrealized_pnl: portfolio.unrealized_pnl,
            realized_pnl: portfolio.realized_pnl,
            position_count: portfolio.open_position_count(),
            as_of: portfolio.as_of,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::CandleClosed { .. } => "candle_closed",
            PipelineEvent::IndicatorsCalculated { .. } => "indicators_calculated",
            PipelineEvent::TradeProposed { .. } => "trade_proposed",
            PipelineEvent::TradeRejected { .. } => "trade_rejected",
            PipelineEvent::ActionRequired { .. } => "action_required",
            PipelineEvent::TradeApproved { .. } => "trade_approved",
            PipelineEvent::OrderSubmitted { .. } => "order_submitted",
            PipelineEvent::OrderFilled { .. } => "order_filled",
            PipelineEvent::PortfolioUpdated { .. } => "portfolio_updated",
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            PipelineEvent::CandleClosed { symbol, .. }
            | PipelineEvent::IndicatorsCalculated { symbol, .. }
            | PipelineEvent::TradeRejected { symbol, .. }
            | PipelineEvent::ActionRequired { symbol, .. }
            | PipelineEvent::TradeApproved { symbol, .. }
            | PipelineEvent::OrderSubmitted { symbol, .. }
            | PipelineEvent::OrderFilled { symbol, .. } => Some(symbol),
            PipelineEvent::TradeProposed { decision } => Some(&decision.symbol),
            PipelineEvent::PortfolioUpdated { .. } => None,
        }
    }
}

/// Wire wrapper: every event carries the correlation id of the candle that
/// originated the chain, so one trigger is traceable end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: PipelineEvent,
}

impl EventEnvelope {
    pub fn new(correlation_id: Uuid, event: PipelineEvent) -> Self {
        Self {
            correlation_id,
            occurred_at: Utc::now(),
            event,
        }
    }

    /// Derives a new envelope that keeps this envelope's correlation id.
    pub fn follow(&self, event: PipelineEvent) -> Self {
        Self::new(self.correlation_id, event)
    }

    pub fn to_json_line(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|err| format!("failed to serialize event: {err}"))
    }
}
