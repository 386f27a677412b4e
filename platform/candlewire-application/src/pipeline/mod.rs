//! Event-driven decision pipeline.
//!
//! Stages are independent tasks on a broadcast bus: pollers turn market data
//! into CandleClosed events, the indicator stage derives IndicatorsCalculated,
//! the decision stage proposes trades, the approval stage gates them through
//! risk, and the execution stage turns approvals into broker orders. Every
//! stage is idempotent per natural key, so redelivery is harmless.

pub mod approvals;
pub mod audit;
pub mod decisions;
pub mod execution;
pub mod indicators;
pub mod pollers;

pub use approvals::{ApprovalStore, PendingApproval};
pub use audit::{PipelineStats, StatsSnapshot};

use crate::config::TradingMode;
use crate::resilience::ResilienceRegistry;
use candlewire_domain::entities::portfolio::Portfolio;
use candlewire_domain::events::EventEnvelope;
use candlewire_domain::repositories::broker::AccountSnapshot;
use candlewire_domain::repositories::{
    BrokerClient, CandleRepository, ClientError, DecisionOracle, DecisionRepository, EventSink,
    MarketDataClient, StrategyRepository,
};
use candlewire_domain::services::history::IndicatorHistory;
use candlewire_domain::services::indicators::CalculatorRegistry;
use candlewire_domain::services::risk::RiskManager;
use candlewire_domain::value_objects::position::Position;
use candlewire_domain::value_objects::timeframe::Timeframe;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEP_BROKER: &str = "Broker";
pub const DEP_MARKET_DATA: &str = "MarketData";
pub const DEP_ORACLE: &str = "Oracle";

const BUS_CAPACITY: usize = 1024;

/// Everything the stages share for one run.
pub struct PipelineContext {
    pub run_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub trading_enabled: bool,
    pub trading_mode: TradingMode,
    pub default_order_percent: f64,
    pub candle_lookback: usize,
    pub poll_interval: Duration,
    pub idle_shutdown_polls: Option<u32>,
    pub calculators: CalculatorRegistry,
    pub history: Mutex<IndicatorHistory>,
    pub risk: RiskManager,
    pub approvals: ApprovalStore,
    pub portfolio: RwLock<Portfolio>,
    pub candles: Arc<dyn CandleRepository>,
    pub decisions: Arc<dyn DecisionRepository>,
    pub strategies: Arc<dyn StrategyRepository>,
    pub broker: Arc<dyn BrokerClient>,
    pub market_data: Arc<dyn MarketDataClient>,
    pub oracle: Option<Arc<dyn DecisionOracle>>,
    pub resilience: Arc<ResilienceRegistry>,
}

impl PipelineContext {
    pub fn portfolio_snapshot(&self) -> Portfolio {
        self.portfolio.read().clone()
    }

    pub(crate) fn store_portfolio(
        &self,
        account: AccountSnapshot,
        positions: Vec<Position>,
    ) -> Portfolio {
        let next = Portfolio {
            cash: account.cash,
            equity: account.equity,
            buying_power: account.buying_power,
            unrealized_pnl: account.unrealized_pnl,
            realized_pnl: account.realized_pnl,
            positions,
            as_of: account.as_of,
        };
        *self.portfolio.write() = next.clone();
        next
    }

    /// Latest market price for sizing and risk checks; `None` when the feed
    /// cannot answer right now.
    pub(crate) async fn current_price(&self, symbol: &str) -> Option<f64> {
        let guard = self.resilience.guard(DEP_MARKET_DATA);
        match guard
            .execute("get_current_price", || {
                self.market_data.get_current_price(symbol)
            })
            .await
        {
            Ok(price) if price.is_finite() && price > 0.0 => Some(price),
            Ok(price) => {
                tracing::warn!(symbol, price, "ignoring non-positive market price");
                None
            }
            Err(err) => {
                tracing::warn!(symbol, error = %err, "market price unavailable");
                None
            }
        }
    }
}

/// Pulls broker account and positions through the resilience guard and makes
/// the result the pipeline's current portfolio snapshot.
pub async fn refresh_portfolio(ctx: &PipelineContext) -> Result<Portfolio, ClientError> {
    let guard = ctx.resilience.guard(DEP_BROKER);
    let account = guard
        .execute("get_account", || ctx.broker.get_account())
        .await?;
    let positions = guard
        .execute("get_positions", || ctx.broker.get_positions())
        .await?;
    Ok(ctx.store_portfolio(account, positions))
}

/// Next envelope for a stage, or `None` once shutdown is signalled and the
/// stage's queue is drained.
pub(crate) async fn next_event(
    rx: &mut broadcast::Receiver<EventEnvelope>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<EventEnvelope> {
    loop {
        if *shutdown.borrow() {
            match rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bus lagged, events dropped");
                    continue;
                }
                Err(_) => return None,
            }
        }
        tokio::select! {
            _ = shutdown.changed() => continue,
            received = rx.recv() => match received {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bus lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            },
        }
    }
}

pub struct PipelineHandle {
    bus: broadcast::Sender<EventEnvelope>,
    shutdown: Arc<watch::Sender<bool>>,
    stats: Arc<PipelineStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Injects an event from outside the stages, e.g. releasing a held
    /// approval.
    pub fn emit(&self, envelope: EventEnvelope) -> Result<(), String> {
        self.bus
            .send(envelope)
            .map(|_| ())
            .map_err(|_| "event bus has no listeners".to_string())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Cloneable trigger for code that must stop the pipeline while `join`
    /// owns the handle, e.g. a signal listener.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(Arc::clone(&self.shutdown))
    }

    /// Resolves when every stage task has wound down.
    pub async fn join(self) -> StatsSnapshot {
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "pipeline task aborted");
            }
        }
        self.stats.snapshot()
    }
}

#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }
}

pub fn spawn_pipeline(ctx: Arc<PipelineContext>, sink: Arc<dyn EventSink>) -> PipelineHandle {
    let (bus, _initial) = broadcast::channel(BUS_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Arc::new(shutdown_tx);
    let stats = Arc::new(PipelineStats::default());

    let tasks = vec![
        audit::spawn(sink, Arc::clone(&stats), bus.subscribe(), shutdown_rx.clone()),
        indicators::spawn(
            Arc::clone(&ctx),
            bus.clone(),
            bus.subscribe(),
            shutdown_rx.clone(),
        ),
        decisions::spawn(
            Arc::clone(&ctx),
            bus.clone(),
            bus.subscribe(),
            shutdown_rx.clone(),
        ),
        approvals::spawn(
            Arc::clone(&ctx),
            bus.clone(),
            bus.subscribe(),
            shutdown_rx.clone(),
        ),
        execution::spawn(
            Arc::clone(&ctx),
            bus.clone(),
            bus.subscribe(),
            shutdown_rx.clone(),
        ),
        pollers::spawn_market_poller(
            Arc::clone(&ctx),
            bus.clone(),
            shutdown_rx.clone(),
            Arc::clone(&shutdown),
        ),
        pollers::spawn_portfolio_poller(Arc::clone(&ctx), bus.clone(), shutdown_rx),
    ];

    PipelineHandle {
        bus,
        shutdown,
        stats,
        tasks,
    }
}
