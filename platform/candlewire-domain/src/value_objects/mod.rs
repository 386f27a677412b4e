pub mod candle;
pub mod decision;
pub mod fill;
pub mod indicator;
pub mod order;
pub mod position;
pub mod side;
pub mod timeframe;

pub use candle::{Candle, CandleKey};
pub use decision::{DecisionKey, TradeAction, TradeDecision};
pub use fill::Fill;
pub use indicator::{IndicatorField, IndicatorKind, IndicatorSet, IndicatorSnapshot, IndicatorValue};
pub use order::{Order, OrderStatus, OrderType};
pub use position::Position;
pub use side::Side;
pub use timeframe::Timeframe;
