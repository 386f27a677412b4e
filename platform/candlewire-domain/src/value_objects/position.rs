use serde::{Deserialize, Serialize};

const FLAT_EPSILON: f64 = 1e-9;

/// Signed holding for one symbol: positive quantity is long, negative is
/// short, zero is flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.avg_price
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.abs() < FLAT_EPSILON
    }
}
