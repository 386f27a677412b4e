use crate::value_objects::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account snapshot assembled from the broker. Read-only to the pipeline;
/// only the broker-facing collaborator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub equity: f64,
    pub buying_power: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub positions: Vec<Position>,
    pub as_of: DateTime<Utc>,
}

impl Portfolio {
    pub fn empty(cash: f64, as_of: DateTime<Utc>) -> Self {
        Self {
            cash,
            equity: cash,
            buying_power: cash,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            positions: Vec::new(),
            as_of,
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.iter().filter(|p| !p.is_flat()).count()
    }
}
