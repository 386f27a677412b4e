use serde::{Deserialize, Serialize};

/// Portfolio-level constraints enforced by the risk gate. A limit set to
/// zero (or below, for the percent limits) disables that check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_percent: f64,
    pub max_open_positions: usize,
    pub max_daily_loss_percent: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_percent: 10.0,
            max_open_positions: 5,
            max_daily_loss_percent: 3.0,
        }
    }
}

impl RiskLimits {
    pub fn position_limit_enabled(&self) -> bool {
        self.max_position_percent > 0.0
    }

    pub fn open_positions_limit_enabled(&self) -> bool {
        self.max_open_positions > 0
    }

    pub fn daily_loss_limit_enabled(&self) -> bool {
        self.max_daily_loss_percent > 0.0
    }
}
