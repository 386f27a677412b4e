//! Paper broker: fills every order instantly at the feed's current price,
//! adjusted for slippage, fee, and optional jitter. Positions are signed
//! (negative is short); realized PnL books when a fill reduces or flips a
//! position. Submissions are idempotent on `client_order_id`.

use async_trait::async_trait;
use candlewire_domain::repositories::broker::{AccountSnapshot, BrokerClient, OrderAck};
use candlewire_domain::repositories::{ClientError, MarketDataClient};
use candlewire_domain::value_objects::fill::Fill;
use candlewire_domain::value_objects::order::{Order, OrderStatus};
use candlewire_domain::value_objects::position::Position;
use candlewire_domain::value_objects::side::Side;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

const FLAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct PaperBrokerSettings {
    /// Commission in basis points of fill notional.
    pub fee_bps: f64,
    /// Adverse price adjustment in basis points (paid on buys, lost on sells).
    pub slippage_bps: f64,
    /// Uniform random price noise in basis points, 0 disables.
    pub jitter_bps: f64,
}

impl Default for PaperBrokerSettings {
    fn default() -> Self {
        Self {
            fee_bps: 0.0,
            slippage_bps: 0.0,
            jitter_bps: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    quantity: f64,
    avg_price: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    cash: f64,
    realized_pnl: f64,
    positions: BTreeMap<String, Holding>,
    orders: Vec<Order>,
    fills: Vec<Fill>,
    acks: HashMap<String, OrderAck>,
}

pub struct PaperBroker {
    settings: PaperBrokerSettings,
    market_data: Arc<dyn MarketDataClient>,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(
        initial_cash: f64,
        market_data: Arc<dyn MarketDataClient>,
        settings: PaperBrokerSettings,
    ) -> Self {
        let state = PaperState {
            cash: initial_cash,
            ..PaperState::default()
        };
        Self {
            settings,
            market_data,
            state: Mutex::new(state),
        }
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.state.lock().fills.clone()
    }

    async fn reference_price(&self, symbol: &str) -> Result<f64, ClientError> {
        let price = self.market_data.get_current_price(symbol).await?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ClientError::Rejected(format!(
                "no usable price for {symbol}"
            )));
        }
        Ok(price)
    }

    fn fill_price(&self, side: Side, reference: f64) -> f64 {
        let slip = self.settings.slippage_bps / 10_000.0;
        let jitter = if self.settings.jitter_bps > 0.0 {
            let band = self.settings.jitter_bps / 10_000.0;
            rand::thread_rng().gen_range(-band..=band)
        } else {
            0.0
        };
        // Slippage is always adverse: buys pay up, sells receive less.
        reference * (1.0 + side.sign() * slip + jitter)
    }
}

/// Applies a fill to a holding and returns the realized PnL. Extending a
/// position reweights the average price; reducing books PnL against it;
/// flipping through zero resets the basis to the fill price.
fn apply_fill(holding: &mut Holding, side: Side, quantity: f64, price: f64) -> f64 {
    let signed = side.sign() * quantity;
    let old = holding.quantity;
    let new = old + signed;
    let mut realized = 0.0;

    if old.abs() < FLAT_EPSILON || old.signum() == signed.signum() {
        let total_cost = holding.avg_price * old.abs() + price * quantity;
        if new.abs() >= FLAT_EPSILON {
            holding.avg_price = total_cost / new.abs();
        }
    } else {
        let closed = old.abs().min(quantity);
        realized = (price - holding.avg_price) * closed * old.signum();
        if new.abs() < FLAT_EPSILON {
            holding.avg_price = 0.0;
        } else if old.signum() != new.signum() {
            holding.avg_price = price;
        }
    }

    holding.quantity = if new.abs() < FLAT_EPSILON { 0.0 } else { new };
    realized
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_account(&self) -> Result<AccountSnapshot, ClientError> {
        let (cash, realized_pnl, holdings) = {
            let state = self.state.lock();
            (state.cash, state.realized_pnl, state.positions.clone())
        };

        let mut equity = cash;
        let mut unrealized_pnl = 0.0;
        for (symbol, holding) in &holdings {
            if holding.quantity.abs() < FLAT_EPSILON {
                continue;
            }
            // Fall back to cost basis when the feed has no price yet.
            let price = match self.market_data.get_current_price(symbol).await {
                Ok(price) if price.is_finite() && price > 0.0 => price,
                _ => holding.avg_price,
            };
            equity += holding.quantity * price;
            unrealized_pnl += (price - holding.avg_price) * holding.quantity;
        }

        Ok(AccountSnapshot {
            cash,
            equity,
            buying_power: cash.max(0.0),
            unrealized_pnl,
            realized_pnl,
            as_of: Utc::now(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ClientError> {
        let holdings = self.state.lock().positions.clone();
        let mut positions = Vec::new();
        for (symbol, holding) in holdings {
            if holding.quantity.abs() < FLAT_EPSILON {
                continue;
            }
            let price = match self.market_data.get_current_price(&symbol).await {
                Ok(price) if price.is_finite() && price > 0.0 => price,
                _ => holding.avg_price,
            };
            positions.push(Position {
                symbol,
                quantity: holding.quantity,
                avg_price: holding.avg_price,
                current_price: price,
                unrealized_pnl: (price - holding.avg_price) * holding.quantity,
            });
        }
        Ok(positions)
    }

    async fn get_orders(&self) -> Result<Vec<Order>, ClientError> {
        Ok(self.state.lock().orders.clone())
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderAck, ClientError> {
        if let Some(ack) = self.state.lock().acks.get(&order.client_order_id) {
            tracing::debug!(
                client_order_id = %order.client_order_id,
                "resubmission of a known order, returning original ack"
            );
            return Ok(ack.clone());
        }
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return Err(ClientError::Validation(format!(
                "order quantity must be positive, got {}",
                order.quantity
            )));
        }

        let reference = self.reference_price(&order.symbol).await?;
        let price = self.fill_price(order.side, reference);
        let commission = price * order.quantity * self.settings.fee_bps / 10_000.0;
        let now = Utc::now();

        let mut state = self.state.lock();
        if order.side == Side::Buy {
            let cost = price * order.quantity + commission;
            if cost > state.cash + FLAT_EPSILON {
                metrics::counter!("candlewire.infra.paper.orders_total", "result" => "rejected")
                    .increment(1);
                return Err(ClientError::Rejected(format!(
                    "insufficient cash: need {:.2}, have {:.2}",
                    cost, state.cash
                )));
            }
        }

        let holding = state.positions.entry(order.symbol.clone()).or_default();
        state.realized_pnl += apply_fill(holding, order.side, order.quantity, price);
        state.cash -= order.side.sign() * price * order.quantity + commission;

        let mut submitted = order.clone();
        submitted.status = OrderStatus::Filled;
        submitted.submitted_at = Some(now);

        let fill = Fill {
            id: Uuid::new_v4(),
            order_id: submitted.id,
            client_order_id: submitted.client_order_id.clone(),
            symbol: submitted.symbol.clone(),
            side: submitted.side,
            quantity: submitted.quantity,
            price,
            commission,
            filled_at: now,
        };

        let ack = OrderAck {
            order: submitted.clone(),
            fill: Some(fill.clone()),
        };
        state.orders.push(submitted);
        state.fills.push(fill);
        state
            .acks
            .insert(order.client_order_id.clone(), ack.clone());

        metrics::counter!("candlewire.infra.paper.orders_total", "result" => "filled")
            .increment(1);
        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            price,
            commission,
            "paper fill"
        );
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let Some(order) = state.orders.iter_mut().find(|o| o.id == order_id) else {
            return Err(ClientError::Rejected(format!("unknown order {order_id}")));
        };
        if !order.status.can_transition_to(OrderStatus::Canceled) {
            return Err(ClientError::Rejected(format!(
                "order {order_id} is already terminal"
            )));
        }
        order.status = OrderStatus::Canceled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewire_domain::value_objects::timeframe::Timeframe;

    struct FixedPrice(Mutex<f64>);

    impl FixedPrice {
        fn set(&self, price: f64) {
            *self.0.lock() = price;
        }
    }

    #[async_trait]
    impl MarketDataClient for FixedPrice {
        async fn get_historical_bars(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
        ) -> Result<Vec<candlewire_domain::value_objects::candle::Candle>, ClientError> {
            Ok(Vec::new())
        }

        async fn poll_latest_bars(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
        ) -> Result<Vec<candlewire_domain::value_objects::candle::Candle>, ClientError> {
            Ok(Vec::new())
        }

        async fn get_current_price(&self, _symbol: &str) -> Result<f64, ClientError> {
            Ok(*self.0.lock())
        }
    }

    fn broker_at(
        price: f64,
        cash: f64,
        settings: PaperBrokerSettings,
    ) -> (PaperBroker, Arc<FixedPrice>) {
        let feed = Arc::new(FixedPrice(Mutex::new(price)));
        let broker = PaperBroker::new(cash, feed.clone(), settings);
        (broker, feed)
    }

    #[tokio::test]
    async fn round_trip_books_realized_pnl() {
        let (broker, feed) = broker_at(100.0, 10_000.0, PaperBrokerSettings::default());

        let buy = Order::market("d1", "SPY", Side::Buy, 10.0);
        broker.submit_order(&buy).await.unwrap();
        feed.set(110.0);
        let sell = Order::market("d2", "SPY", Side::Sell, 10.0);
        broker.submit_order(&sell).await.unwrap();

        let account = broker.get_account().await.unwrap();
        assert!((account.realized_pnl - 100.0).abs() < 1e-9);
        assert!((account.cash - 10_100.0).abs() < 1e-9);
        assert!(broker.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn buy_rejected_when_cash_is_short() {
        let (broker, _) = broker_at(100.0, 500.0, PaperBrokerSettings::default());
        let order = Order::market("d1", "SPY", Side::Buy, 10.0);
        let err = broker.submit_order(&order).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
        assert!(broker.get_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resubmission_returns_the_original_ack() {
        let (broker, _) = broker_at(100.0, 10_000.0, PaperBrokerSettings::default());
        let order = Order::market("d1", "SPY", Side::Buy, 5.0);
        let first = broker.submit_order(&order).await.unwrap();
        let second = broker.submit_order(&order).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.fills().len(), 1);
        let account = broker.get_account().await.unwrap();
        assert!((account.cash - 9_500.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fee_and_slippage_hit_the_fill() {
        let settings = PaperBrokerSettings {
            fee_bps: 10.0,
            slippage_bps: 10.0,
            jitter_bps: 0.0,
        };
        let (broker, _) = broker_at(400.0, 100_000.0, settings);
        let order = Order::market("d1", "SPY", Side::Buy, 10.0);
        let ack = broker.submit_order(&order).await.unwrap();

        let fill = ack.fill.unwrap();
        // 10 bps up on 400 = 400.40; fee is 10 bps of notional.
        assert!((fill.price - 400.40).abs() < 1e-9);
        assert!((fill.commission - 400.40 * 10.0 * 0.001).abs() < 1e-9);
    }

    #[tokio::test]
    async fn averaging_up_keeps_basis_until_reduced() {
        let (broker, feed) = broker_at(100.0, 100_000.0, PaperBrokerSettings::default());
        broker
            .submit_order(&Order::market("d1", "SPY", Side::Buy, 10.0))
            .await
            .unwrap();
        feed.set(120.0);
        broker
            .submit_order(&Order::market("d2", "SPY", Side::Buy, 10.0))
            .await
            .unwrap();

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].avg_price - 110.0).abs() < 1e-9);

        // Partial close realizes against the blended basis.
        feed.set(130.0);
        broker
            .submit_order(&Order::market("d3", "SPY", Side::Sell, 5.0))
            .await
            .unwrap();
        let account = broker.get_account().await.unwrap();
        assert!((account.realized_pnl - 100.0).abs() < 1e-9);
        let positions = broker.get_positions().await.unwrap();
        assert!((positions[0].avg_price - 110.0).abs() < 1e-9);
        assert!((positions[0].quantity - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn selling_through_zero_flips_to_short_at_fill_price() {
        let (broker, feed) = broker_at(100.0, 100_000.0, PaperBrokerSettings::default());
        broker
            .submit_order(&Order::market("d1", "SPY", Side::Buy, 5.0))
            .await
            .unwrap();
        feed.set(90.0);
        broker
            .submit_order(&Order::market("d2", "SPY", Side::Sell, 8.0))
            .await
            .unwrap();

        let account = broker.get_account().await.unwrap();
        assert!((account.realized_pnl - (-50.0)).abs() < 1e-9);
        let positions = broker.get_positions().await.unwrap();
        assert!((positions[0].quantity - (-3.0)).abs() < 1e-9);
        assert!((positions[0].avg_price - 90.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancel_only_works_before_terminal() {
        let (broker, _) = broker_at(100.0, 10_000.0, PaperBrokerSettings::default());
        let order = Order::market("d1", "SPY", Side::Buy, 1.0);
        let ack = broker.submit_order(&order).await.unwrap();
        let err = broker.cancel_order(ack.order.id).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
    }
}
