//! TradeApproved -> OrderSubmitted / OrderFilled / PortfolioUpdated.
//!
//! The last stop before the broker. The order-level risk check runs here
//! again because the portfolio may have moved between approval and
//! execution, in ask mode possibly by hours.

use super::{next_event, refresh_portfolio, PipelineContext, DEP_BROKER};
use candlewire_domain::events::{EventEnvelope, PipelineEvent};
use candlewire_domain::value_objects::decision::TradeAction;
use candlewire_domain::value_objects::order::Order;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub(crate) fn spawn(
    ctx: Arc<PipelineContext>,
    bus: broadcast::Sender<EventEnvelope>,
    rx: broadcast::Receiver<EventEnvelope>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = rx;
        let mut shutdown = shutdown;
        while let Some(envelope) = next_event(&mut rx, &mut shutdown).await {
            let PipelineEvent::TradeApproved {
                decision_id,
                symbol,
                action,
                quantity,
                ..
            } = &envelope.event
            else {
                continue;
            };
            let decision_id = *decision_id;
            let symbol = symbol.clone();
            let action = *action;
            let quantity = *quantity;
            process(&ctx, &bus, &envelope, decision_id, symbol, action, quantity).await;
        }
    })
}

async fn process(
    ctx: &PipelineContext,
    bus: &broadcast::Sender<EventEnvelope>,
    envelope: &EventEnvelope,
    decision_id: Uuid,
    symbol: String,
    action: TradeAction,
    quantity: Option<f64>,
) {
    let Some(side) = action.as_side() else {
        tracing::warn!(%decision_id, "approved trade has no tradable side, skipping");
        return;
    };
    let quantity = match quantity {
        Some(q) if q > 0.0 => q,
        _ => {
            tracing::warn!(%decision_id, symbol, "approved trade has no usable quantity, skipping");
            return;
        }
    };

    // client_order_id = decision id, so a replayed approval maps onto the
    // same broker order instead of a second one.
    let order = Order::market(&decision_id.to_string(), &symbol, side, quantity);
    let reference = ctx.current_price(&symbol).await;
    let verdict = ctx
        .risk
        .check_order(&order, &ctx.portfolio_snapshot(), reference);
    if !verdict.approved {
        let reason = verdict
            .reason
            .unwrap_or_else(|| "order rejected by risk check".to_string());
        metrics::counter!("candlewire.pipeline.trades_rejected").increment(1);
        tracing::info!(symbol, reason, "order blocked before submission");
        let _ = bus.send(envelope.follow(PipelineEvent::TradeRejected {
            decision_id,
            symbol,
            reason,
        }));
        return;
    }
    for warning in &verdict.warnings {
        tracing::warn!(symbol, warning, "order risk warning");
    }

    let started = Instant::now();
    let guard = ctx.resilience.guard(DEP_BROKER);
    let ack = match guard
        .execute("submit_order", || ctx.broker.submit_order(&order))
        .await
    {
        Ok(ack) => ack,
        Err(err) => {
            // The decision stays approved-but-unexecuted; the operator sees
            // it in the audit trail and can resubmit once the broker is back.
            metrics::counter!("candlewire.pipeline.submit_failures").increment(1);
            tracing::error!(symbol, error = %err, "order submission failed");
            return;
        }
    };
    metrics::histogram!("candlewire.pipeline.submit_ms").record(started.elapsed().as_millis() as f64);
    metrics::counter!("candlewire.pipeline.orders_submitted").increment(1);
    tracing::info!(
        symbol = %ack.order.symbol,
        side = %ack.order.side,
        quantity = ack.order.quantity,
        "order submitted"
    );
    let _ = bus.send(envelope.follow(PipelineEvent::order_submitted(&ack.order)));

    if let Some(fill) = &ack.fill {
        tracing::info!(
            symbol = %fill.symbol,
            price = fill.price,
            quantity = fill.quantity,
            "order filled"
        );
        let _ = bus.send(envelope.follow(PipelineEvent::order_filled(fill)));
    }

    match refresh_portfolio(ctx).await {
        Ok(portfolio) => {
            let _ = bus.send(envelope.follow(PipelineEvent::portfolio_updated(&portfolio)));
        }
        Err(err) => {
            tracing::warn!(error = %err, "portfolio refresh after fill failed");
        }
    }
}
