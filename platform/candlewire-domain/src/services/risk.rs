//! Portfolio-level risk gate.
//!
//! Pure validation over a portfolio snapshot; rejection is a normal outcome,
//! not an error. Checks short-circuit in order: position size, open-position
//! count, then daily loss.

use crate::entities::portfolio::Portfolio;
use crate::entities::risk::RiskLimits;
use crate::value_objects::decision::TradeDecision;
use crate::value_objects::order::Order;
use crate::value_objects::side::Side;

/// Fraction of the position-size limit that triggers a warning.
pub const POSITION_WARN_RATIO: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub approved: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl RiskVerdict {
    fn approved(warnings: Vec<String>) -> Self {
        Self {
            approved: true,
            reason: None,
            warnings,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            approved: false,
            reason: Some(reason),
            warnings: Vec::new(),
        }
    }
}

pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn check_trade(
        &self,
        decision: &TradeDecision,
        portfolio: &Portfolio,
        reference_price: Option<f64>,
    ) -> RiskVerdict {
        let mut warnings = Vec::new();

        if self.limits.position_limit_enabled() {
            if portfolio.equity <= 0.0 {
                return RiskVerdict::rejected(
                    "position sizing requires positive equity".to_string(),
                );
            }
            let current_percent = portfolio
                .position(&decision.symbol)
                .map(|p| p.market_value().abs() / portfolio.equity * 100.0)
                .unwrap_or(0.0);
            let requested_percent = requested_percent(decision, portfolio, reference_price);
            let prospective = current_percent + requested_percent;
            if prospective > self.limits.max_position_percent {
                return RiskVerdict::rejected(format!(
                    "position would reach {prospective:.2}% of equity, limit is {:.2}%",
                    self.limits.max_position_percent
                ));
            }
            if prospective > POSITION_WARN_RATIO * self.limits.max_position_percent {
                warnings.push(format!(
                    "position at {prospective:.2}% of equity, approaching the {:.2}% limit",
                    self.limits.max_position_percent
                ));
            }
        }

        if self.limits.open_positions_limit_enabled() {
            let open = portfolio.open_position_count();
            let already_held = portfolio
                .position(&decision.symbol)
                .map(|p| !p.is_flat())
                .unwrap_or(false);
            // Adding to or flattening an existing position is allowed at the cap.
            if open >= self.limits.max_open_positions && !already_held {
                return RiskVerdict::rejected(format!(
                    "{open} positions open, limit is {}",
                    self.limits.max_open_positions
                ));
            }
        }

        if self.limits.daily_loss_limit_enabled() {
            let total_pnl = portfolio.total_pnl();
            if total_pnl < 0.0 {
                if portfolio.cash <= 0.0 {
                    return RiskVerdict::rejected(
                        "daily loss check requires positive cash".to_string(),
                    );
                }
                let loss_percent = total_pnl.abs() / portfolio.cash * 100.0;
                if loss_percent > self.limits.max_daily_loss_percent {
                    return RiskVerdict::rejected(format!(
                        "daily loss at {loss_percent:.2}%, limit is {:.2}%",
                        self.limits.max_daily_loss_percent
                    ));
                }
            }
        }

        RiskVerdict::approved(warnings)
    }

    /// Buying-power gate for a concrete order. Sells release capital, so only
    /// buys are checked.
    pub fn check_order(
        &self,
        order: &Order,
        portfolio: &Portfolio,
        reference_price: Option<f64>,
    ) -> RiskVerdict {
        if order.side != Side::Buy {
            return RiskVerdict::approved(Vec::new());
        }
        match order.notional(reference_price) {
            Some(notional) if notional > portfolio.buying_power => RiskVerdict::rejected(format!(
                "order notional {notional:.2} exceeds buying power {:.2}",
                portfolio.buying_power
            )),
            Some(_) => RiskVerdict::approved(Vec::new()),
            None => RiskVerdict::approved(vec![
                "order notional unknown, buying power not verified".to_string(),
            ]),
        }
    }
}

/// Percent of equity the decision asks for. An absolute quantity needs a
/// reference price to be expressed as a percent; without one it counts as 0.
fn requested_percent(
    decision: &TradeDecision,
    portfolio: &Portfolio,
    reference_price: Option<f64>,
) -> f64 {
    if let Some(percent) = decision.quantity_percent {
        return percent;
    }
    match (decision.quantity, reference_price) {
        (Some(quantity), Some(price)) if portfolio.equity > 0.0 => {
            (quantity * price).abs() / portfolio.equity * 100.0
        }
        _ => 0.0,
    }
}
