use crate::value_objects::side::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (*self, next) {
            (Pending, Submitted) | (Pending, Canceled) | (Pending, Rejected) => true,
            (Submitted, PartiallyFilled)
            | (Submitted, Filled)
            | (Submitted, Canceled)
            | (Submitted, Rejected) => true,
            (PartiallyFilled, PartiallyFilled)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Canceled) => true,
            _ => false,
        }
    }
}

/// `client_order_id` is the submission idempotency key; brokers treat a
/// resubmission with the same value as the same logical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn market(client_order_id: &str, symbol: &str, side: Side, quantity: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            status: OrderStatus::Pending,
            submitted_at: None,
        }
    }

    pub fn notional(&self, reference_price: Option<f64>) -> Option<f64> {
        self.limit_price
            .or(reference_price)
            .filter(|price| *price > 0.0)
            .map(|price| self.quantity * price)
    }
}
