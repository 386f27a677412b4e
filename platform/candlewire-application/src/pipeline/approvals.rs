//! TradeProposed -> TradeApproved | ActionRequired | TradeRejected.
//!
//! The risk gate sits between decision producers and the broker. Proposals
//! that clear the gate are either approved on the spot (auto mode) or parked
//! in the [`ApprovalStore`] until an operator releases them (ask mode).

use super::{next_event, PipelineContext};
use crate::config::TradingMode;
use candlewire_domain::events::{EventEnvelope, PipelineEvent};
use candlewire_domain::value_objects::decision::TradeDecision;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A proposal that passed the risk gate in ask mode and is waiting for a
/// human verdict. The resolved order quantity is carried along so the
/// release path does not have to re-derive it from a stale price.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub decision: TradeDecision,
    pub quantity: f64,
    pub warnings: Vec<String>,
    pub correlation_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

impl PendingApproval {
    /// Builds the approval event that releases this proposal, correlated to
    /// the original candle so the audit trail stays in one thread.
    pub fn into_approved_event(self, approved_by: &str, now: DateTime<Utc>) -> EventEnvelope {
        EventEnvelope::new(
            self.correlation_id,
            PipelineEvent::TradeApproved {
                decision_id: self.decision.id,
                symbol: self.decision.symbol,
                action: self.decision.action,
                quantity: Some(self.quantity),
                stop_loss: self.decision.stop_loss,
                approved_by: approved_by.to_string(),
                approved_at: now,
            },
        )
    }
}

/// Proposals waiting for operator sign-off, keyed by decision id.
#[derive(Debug, Default)]
pub struct ApprovalStore {
    inner: Mutex<HashMap<Uuid, PendingApproval>>,
}

impl ApprovalStore {
    pub fn insert(&self, pending: PendingApproval) {
        self.inner.lock().insert(pending.decision.id, pending);
    }

    /// Removes and returns the pending proposal, if still waiting.
    pub fn take(&self, decision_id: Uuid) -> Option<PendingApproval> {
        self.inner.lock().remove(&decision_id)
    }

    /// Waiting proposals, oldest first.
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut all: Vec<PendingApproval> = self.inner.lock().values().cloned().collect();
        all.sort_by_key(|p| p.requested_at);
        all
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

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
            let PipelineEvent::TradeProposed { decision } = &envelope.event else {
                continue;
            };
            let decision = decision.clone();
            process(&ctx, &bus, &envelope, decision).await;
        }
    })
}

async fn process(
    ctx: &PipelineContext,
    bus: &broadcast::Sender<EventEnvelope>,
    envelope: &EventEnvelope,
    decision: TradeDecision,
) {
    if !ctx.trading_enabled {
        reject(bus, envelope, &decision, "Trading is disabled".to_string());
        return;
    }

    let reference = ctx.current_price(&decision.symbol).await;
    let portfolio = ctx.portfolio_snapshot();
    let verdict = ctx.risk.check_trade(&decision, &portfolio, reference);
    if !verdict.approved {
        let reason = verdict
            .reason
            .unwrap_or_else(|| "risk limits exceeded".to_string());
        reject(bus, envelope, &decision, reason);
        return;
    }
    for warning in &verdict.warnings {
        tracing::warn!(symbol = %decision.symbol, warning, "risk warning");
    }

    let quantity = match resolve_quantity(&decision, &portfolio, reference) {
        Some(q) => q,
        None => {
            reject(
                bus,
                envelope,
                &decision,
                "cannot size order without a market price".to_string(),
            );
            return;
        }
    };

    match ctx.trading_mode {
        TradingMode::Auto => {
            metrics::counter!("candlewire.pipeline.trades_approved").increment(1);
            tracing::info!(
                symbol = %decision.symbol,
                action = %decision.action,
                quantity,
                "auto-approved trade"
            );
            let _ = bus.send(envelope.follow(PipelineEvent::TradeApproved {
                decision_id: decision.id,
                symbol: decision.symbol,
                action: decision.action,
                quantity: Some(quantity),
                stop_loss: decision.stop_loss,
                approved_by: "System".to_string(),
                approved_at: Utc::now(),
            }));
        }
        TradingMode::Ask => {
            metrics::counter!("candlewire.pipeline.actions_required").increment(1);
            tracing::info!(
                symbol = %decision.symbol,
                action = %decision.action,
                quantity,
                "trade waiting for approval"
            );
            let event = PipelineEvent::ActionRequired {
                decision_id: decision.id,
                symbol: decision.symbol.clone(),
                action: decision.action,
                quantity: Some(quantity),
                confidence: decision.confidence,
                rationale: decision.rationale.clone(),
                annotations: verdict.warnings.clone(),
            };
            ctx.approvals.insert(PendingApproval {
                decision,
                quantity,
                warnings: verdict.warnings,
                correlation_id: envelope.correlation_id,
                requested_at: Utc::now(),
            });
            let _ = bus.send(envelope.follow(event));
        }
    }
}

fn reject(
    bus: &broadcast::Sender<EventEnvelope>,
    envelope: &EventEnvelope,
    decision: &TradeDecision,
    reason: String,
) {
    metrics::counter!("candlewire.pipeline.trades_rejected").increment(1);
    tracing::info!(symbol = %decision.symbol, reason, "trade rejected");
    let _ = bus.send(envelope.follow(PipelineEvent::TradeRejected {
        decision_id: decision.id,
        symbol: decision.symbol.clone(),
        reason,
    }));
}

/// Turns a decision into a concrete share count. Absolute quantity wins;
/// percent sizing needs a live price to convert equity into shares.
fn resolve_quantity(
    decision: &TradeDecision,
    portfolio: &candlewire_domain::entities::portfolio::Portfolio,
    reference_price: Option<f64>,
) -> Option<f64> {
    if let Some(quantity) = decision.quantity {
        if quantity > 0.0 {
            return Some(quantity);
        }
        return None;
    }
    let percent = decision.quantity_percent?;
    let price = reference_price?;
    if percent <= 0.0 || price <= 0.0 {
        return None;
    }
    let quantity = (portfolio.equity * percent / 100.0) / price;
    if quantity > 0.0 {
        Some(quantity)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewire_domain::entities::portfolio::Portfolio;
    use candlewire_domain::value_objects::decision::TradeAction;
    use candlewire_domain::value_objects::timeframe::Timeframe;

    fn decision() -> TradeDecision {
        TradeDecision::new("AAPL", Timeframe::Min5, Utc::now(), TradeAction::Buy)
    }

    #[test]
    fn absolute_quantity_wins_over_percent() {
        let mut d = decision();
        d.quantity = Some(3.0);
        d.quantity_percent = Some(50.0);
        let portfolio = Portfolio::empty(10_000.0, Utc::now());
        assert_eq!(resolve_quantity(&d, &portfolio, Some(100.0)), Some(3.0));
    }

    #[test]
    fn percent_sizing_converts_equity_at_reference_price() {
        let mut d = decision();
        d.quantity_percent = Some(10.0);
        let portfolio = Portfolio::empty(10_000.0, Utc::now());
        // 10% of 10k equity at $200 = 5 shares.
        assert_eq!(resolve_quantity(&d, &portfolio, Some(200.0)), Some(5.0));
    }

    #[test]
    fn percent_sizing_without_price_fails() {
        let mut d = decision();
        d.quantity_percent = Some(10.0);
        let portfolio = Portfolio::empty(10_000.0, Utc::now());
        assert_eq!(resolve_quantity(&d, &portfolio, None), None);
    }

    #[test]
    fn unsized_decision_fails() {
        let d = decision();
        let portfolio = Portfolio::empty(10_000.0, Utc::now());
        assert_eq!(resolve_quantity(&d, &portfolio, Some(100.0)), None);
    }

    #[test]
    fn store_returns_oldest_first_and_takes_once() {
        let store = ApprovalStore::default();
        let mut first = PendingApproval {
            decision: decision(),
            quantity: 1.0,
            warnings: Vec::new(),
            correlation_id: Uuid::new_v4(),
            requested_at: Utc::now(),
        };
        first.requested_at = Utc::now() - chrono::Duration::seconds(5);
        let second = PendingApproval {
            decision: decision(),
            quantity: 2.0,
            warnings: Vec::new(),
            correlation_id: Uuid::new_v4(),
            requested_at: Utc::now(),
        };
        let first_id = first.decision.id;
        store.insert(first);
        store.insert(second.clone());

        let pending = store.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].decision.id, first_id);

        assert!(store.take(first_id).is_some());
        assert!(store.take(first_id).is_none());
        assert_eq!(store.len(), 1);
    }
}
