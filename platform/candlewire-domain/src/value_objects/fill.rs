use crate::value_objects::side::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution record for one (possibly partial) fill. Append-only: fills are
/// never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: Uuid,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    pub fn gross_value(&self) -> f64 {
        self.quantity * self.price
    }
}
