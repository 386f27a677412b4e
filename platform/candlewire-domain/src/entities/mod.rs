pub mod portfolio;
pub mod risk;
pub mod strategy;

pub use portfolio::Portfolio;
pub use risk::RiskLimits;
pub use strategy::{
    AlertCondition, AlertConditionType, ConditionOperand, ConditionOperator, IndicatorAlert,
    Strategy,
};
