use super::ClientError;
use crate::value_objects::fill::Fill;
use crate::value_objects::order::Order;
use crate::value_objects::position::Position;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub buying_power: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub as_of: DateTime<Utc>,
}

/// Broker response to a submission: the order as the broker now sees it,
/// plus an immediate fill when one happened synchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order: Order,
    pub fill: Option<Fill>,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> Result<AccountSnapshot, ClientError>;
    async fn get_positions(&self) -> Result<Vec<Position>, ClientError>;
    async fn get_orders(&self) -> Result<Vec<Order>, ClientError>;
    async fn submit_order(&self, order: &Order) -> Result<OrderAck, ClientError>;
    async fn cancel_order(&self, order_id: Uuid) -> Result<(), ClientError>;
}
