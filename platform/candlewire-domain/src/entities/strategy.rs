use crate::value_objects::decision::TradeAction;
use crate::value_objects::indicator::{IndicatorField, IndicatorKind};
use crate::value_objects::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertConditionType {
    RisesAbove,
    FallsBelow,
    CrossesAbove,
    CrossesBelow,
    Equals,
    GreaterThan,
    LessThan,
}

impl AlertConditionType {
    pub fn label(&self) -> &'static str {
        match self {
            AlertConditionType::RisesAbove => "rises_above",
            AlertConditionType::FallsBelow => "falls_below",
            AlertConditionType::CrossesAbove => "crosses_above",
            AlertConditionType::CrossesBelow => "crosses_below",
            AlertConditionType::Equals => "equals",
            AlertConditionType::GreaterThan => "greater_than",
            AlertConditionType::LessThan => "less_than",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    And,
    Or,
}

/// Operand of a boolean condition: either an alert or another condition,
/// referenced by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionOperand {
    Alert { id: Uuid },
    Condition { id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorAlert {
    pub id: Uuid,
    pub indicator: IndicatorKind,
    pub condition: AlertConditionType,
    pub threshold: Option<f64>,
    pub field: Option<IndicatorField>,
    pub timeframe: Timeframe,
    pub order_index: u32,
}

impl IndicatorAlert {
    pub fn describe(&self) -> String {
        match self.threshold {
            Some(threshold) => format!(
                "{} {} {}",
                self.indicator,
                self.condition.label(),
                threshold
            ),
            None => format!("{} {}", self.indicator, self.condition.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub id: Uuid,
    pub operator: ConditionOperator,
    pub left: ConditionOperand,
    pub right: ConditionOperand,
}

/// A named rule set: alerts (optionally combined through conditions) mapped
/// to a single final action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub timeframe: Timeframe,
    pub alerts: Vec<IndicatorAlert>,
    pub conditions: Vec<AlertCondition>,
    pub final_action: TradeAction,
    /// Sizing hint copied onto fired decisions.
    pub quantity_percent: Option<f64>,
}

impl Strategy {
    pub fn new(name: &str, timeframe: Timeframe, final_action: TradeAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            enabled: true,
            timeframe,
            alerts: Vec::new(),
            conditions: Vec::new(),
            final_action,
            quantity_percent: None,
        }
    }

    pub fn alert(&self, id: Uuid) -> Option<&IndicatorAlert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn condition(&self, id: Uuid) -> Option<&AlertCondition> {
        self.conditions.iter().find(|c| c.id == id)
    }

    /// Structural check: ids unique, every operand reference resolvable.
    /// Cycles are legal here; the evaluator treats them as non-matching.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("strategy name is empty".to_string());
        }
        let mut ids = std::collections::HashSet::new();
        for alert in &self.alerts {
            if !ids.insert(alert.id) {
                return Err(format!("duplicate alert id {} in '{}'", alert.id, self.name));
            }
        }
        for condition in &self.conditions {
            if !ids.insert(condition.id) {
                return Err(format!(
                    "duplicate condition id {} in '{}'",
                    condition.id, self.name
                ));
            }
        }
        for condition in &self.conditions {
            for operand in [condition.left, condition.right] {
                match operand {
                    ConditionOperand::Alert { id } if self.alert(id).is_none() => {
                        return Err(format!(
                            "condition {} in '{}' references unknown alert {}",
                            condition.id, self.name, id
                        ));
                    }
                    ConditionOperand::Condition { id } if self.condition(id).is_none() => {
                        return Err(format!(
                            "condition {} in '{}' references unknown condition {}",
                            condition.id, self.name, id
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
