//! Order manager: the single writer
//!
//! Every mutation of an order's status goes through [`OrderManager::transition`],
//! which checks the canonical table, persists through a status
//! compare-and-swap, and publishes the mapped lifecycle event. Nothing else
//! in the crate writes `Order.status`.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::conflict::ConflictDetector;
use crate::domain::{
    ConflictResolution, Event, EventType, Order, OrderAction, OrderStatus, TransitionRecord,
};
use crate::error::{ArbiterError, Result};
use crate::ownership::OwnershipService;
use crate::store::TradeStore;

pub struct OrderManager {
    store: Arc<dyn TradeStore>,
    bus: Arc<EventBus>,
    detector: Arc<ConflictDetector>,
    ownership: Arc<OwnershipService>,
    history: RwLock<Vec<TransitionRecord>>,
}

impl OrderManager {
    pub fn new(
        store: Arc<dyn TradeStore>,
        bus: Arc<EventBus>,
        detector: Arc<ConflictDetector>,
        ownership: Arc<OwnershipService>,
    ) -> Self {
        Self {
            store,
            bus,
            detector,
            ownership,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Intake a signal: persist, validate, arbitrate, and hand back the
    /// order in `OrderPending`, or in `Rejected` with the reasoning
    /// attached, which is an expected outcome, not an error.
    pub async fn create_order(
        &self,
        ticker: &str,
        action: OrderAction,
        quantity: u64,
        strategy_id: Uuid,
    ) -> Result<Order> {
        let mut order = Order::new(ticker, action, quantity, strategy_id);
        self.store.insert_order(&order).await?;
        info!(
            "Order {} created: {} {} x{} by {}",
            order.id, action, ticker, quantity, strategy_id
        );

        self.transition(&mut order, OrderStatus::Validating, Some("signal intake"), None)
            .await?;

        let check = self
            .detector
            .check_conflict(strategy_id, ticker, action, quantity)
            .await?;

        if !check.can_proceed {
            let mut detail = serde_json::Map::new();
            detail.insert(
                "conflict_resolution".to_string(),
                serde_json::Value::String(check.resolution.as_str().to_string()),
            );
            if let Some(owner) = check.owner_id {
                detail.insert(
                    "blocking_owner".to_string(),
                    serde_json::Value::String(owner.to_string()),
                );
            }
            self.transition(
                &mut order,
                OrderStatus::Rejected,
                Some(&check.reasoning),
                Some(detail),
            )
            .await?;
            return Ok(order);
        }

        if check.resolution == ConflictResolution::PriorityOverride {
            let owner = check.owner_id.ok_or_else(|| ArbiterError::OwnershipInconsistency {
                ticker: ticker.to_string(),
                reason: "override resolved without an owner".to_string(),
            })?;
            let outcome = self
                .ownership
                .transfer_ownership(ticker, owner, strategy_id, &check.reasoning)
                .await?;
            if !outcome.success {
                self.transition(
                    &mut order,
                    OrderStatus::Rejected,
                    Some(&outcome.message),
                    None,
                )
                .await?;
                return Ok(order);
            }
        } else if check.owner_id.is_none() {
            // First strategy on this ticker takes the primary claim.
            self.ownership
                .claim_ownership(ticker, strategy_id, "first acquisition")
                .await?;
        }

        self.transition(&mut order, OrderStatus::OrderPending, None, None)
            .await?;
        Ok(order)
    }

    /// Perform one validated transition.
    ///
    /// The legality check and the persistence write succeed or fail
    /// together: an illegal pair rejects before any mutation, and a failed
    /// or raced write reverts the in-memory order before propagating.
    pub async fn transition(
        &self,
        order: &mut Order,
        target: OrderStatus,
        reason: Option<&str>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        OrderStatus::validate_transition(order.status, target)?;

        let previous = order.status;
        let previous_error = order.error.clone();
        let previous_metadata = order.metadata.clone();
        let previous_updated_at = order.updated_at;

        order.status = target;
        order.updated_at = Utc::now();
        if let Some(reason) = reason {
            if matches!(
                target,
                OrderStatus::Rejected | OrderStatus::Failed | OrderStatus::Cancelled
            ) {
                order.error = Some(reason.to_string());
            }
        }
        if let Some(metadata) = metadata {
            for (key, value) in metadata {
                order.metadata.insert(key, value);
            }
        }

        let revert = |order: &mut Order| {
            order.status = previous;
            order.error = previous_error.clone();
            order.metadata = previous_metadata.clone();
            order.updated_at = previous_updated_at;
        };

        match self.store.update_order(order, previous).await {
            Ok(true) => {}
            Ok(false) => {
                revert(order);
                // A concurrent writer moved the order first; report the
                // transition against the state that actually holds.
                let actual = self
                    .store
                    .get_order(order.id)
                    .await?
                    .map(|o| o.status)
                    .unwrap_or(previous);
                warn!(
                    "Order {} transition {} -> {} lost to concurrent write (now {})",
                    order.id, previous, target, actual
                );
                return Err(ArbiterError::invalid_transition(
                    actual.as_str(),
                    target.as_str(),
                ));
            }
            Err(e) => {
                revert(order);
                return Err(e);
            }
        }

        debug!(
            "Order {} transitioned {} -> {}{}",
            order.id,
            previous,
            target,
            reason.map(|r| format!(" ({})", r)).unwrap_or_default()
        );
        self.history
            .write()
            .expect("history lock poisoned")
            .push(TransitionRecord::new(order.id, previous, target, reason));

        if let Some(event_type) = EventType::for_status(target) {
            // Consumer failures are the bus's problem, never the writer's.
            self.bus.publish(Event::order(event_type, order, reason));
        }
        Ok(())
    }

    // ==================== Convenience wrappers ====================
    //
    // Thin, declarative shims over `transition`; none of them bypass it.

    pub async fn receive_signal(&self, order: &mut Order, reason: &str) -> Result<()> {
        self.transition(order, OrderStatus::SignalReceived, Some(reason), None)
            .await
    }

    pub async fn start_validation(&self, order: &mut Order) -> Result<()> {
        self.transition(order, OrderStatus::Validating, None, None)
            .await
    }

    pub async fn validation_passed(&self, order: &mut Order) -> Result<()> {
        self.transition(order, OrderStatus::OrderPending, Some("validation passed"), None)
            .await
    }

    pub async fn validation_failed(&self, order: &mut Order, reason: &str) -> Result<()> {
        self.transition(order, OrderStatus::Rejected, Some(reason), None)
            .await
    }

    /// Record broker acceptance along with the broker's order id.
    pub async fn order_sent(&self, order: &mut Order, broker_order_id: &str) -> Result<()> {
        order.broker_order_id = Some(broker_order_id.to_string());
        self.transition(order, OrderStatus::OrderSent, None, None)
            .await
    }

    pub async fn order_failed(&self, order: &mut Order, reason: &str) -> Result<()> {
        self.transition(order, OrderStatus::Failed, Some(reason), None)
            .await
    }

    pub async fn partial_fill(
        &self,
        order: &mut Order,
        filled_quantity: u64,
        price: Decimal,
    ) -> Result<()> {
        order.filled_quantity = filled_quantity;
        order.filled_price = Some(price);
        self.transition(order, OrderStatus::PartialFilled, None, None)
            .await
    }

    pub async fn fully_filled(&self, order: &mut Order, price: Decimal) -> Result<()> {
        order.filled_quantity = order.quantity;
        order.filled_price = Some(price);
        self.transition(order, OrderStatus::FullyFilled, None, None)
            .await
    }

    pub async fn cancel(&self, order: &mut Order, reason: &str) -> Result<()> {
        self.transition(order, OrderStatus::Cancelled, Some(reason), None)
            .await
    }

    /// Flag an order for operator attention without touching its status.
    pub async fn flag_manual_review(&self, order: &mut Order, note: &str) -> Result<()> {
        self.store.set_manual_review(order.id, note).await?;
        order.needs_manual_review = true;
        order.error = Some(note.to_string());
        Ok(())
    }

    /// Transitions performed in this process, oldest first.
    pub fn transition_history(&self) -> Vec<TransitionRecord> {
        self.history
            .read()
            .expect("history lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Strategy, TimeHorizon};
    use crate::store::{MemoryStore, TradeStore};
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        manager: OrderManager,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
            let bus = Arc::new(EventBus::default());
            let detector = Arc::new(ConflictDetector::new(store.clone(), bus.clone()));
            let ownership = Arc::new(OwnershipService::new(store.clone(), bus.clone()));
            let manager = OrderManager::new(store.clone(), bus.clone(), detector, ownership);
            Self {
                store,
                bus,
                manager,
            }
        }

        async fn strategy(&self, name: &str, priority: i32) -> Strategy {
            let s = Strategy::new(name, priority, TimeHorizon::Intraday);
            self.store.insert_strategy(&s).await.unwrap();
            s
        }
    }

    #[tokio::test]
    async fn test_create_order_on_unowned_ticker_claims_and_pends() {
        let fx = Fixture::new();
        let s = fx.strategy("momo", 50).await;

        let order = fx
            .manager
            .create_order("TSLA", OrderAction::Buy, 5, s.id)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::OrderPending);
        let claim = fx.store.get_primary_ownership("TSLA").await.unwrap().unwrap();
        assert_eq!(claim.strategy_id, s.id);

        // SignalReceived -> Validating -> OrderPending, in order.
        let history = fx.manager.transition_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from, OrderStatus::SignalReceived);
        assert_eq!(history[1].to, OrderStatus::OrderPending);
    }

    #[tokio::test]
    async fn test_create_order_blocked_by_conflict_is_rejected_data() {
        let fx = Fixture::new();
        let a = fx.strategy("alpha", 100).await;
        let b = fx.strategy("beta", 50).await;
        fx.manager
            .create_order("AAPL", OrderAction::Buy, 10, a.id)
            .await
            .unwrap();

        let order = fx
            .manager
            .create_order("AAPL", OrderAction::Sell, 10, b.id)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.error.as_deref().unwrap().contains("insufficient priority"));
        assert_eq!(
            order.metadata.get("conflict_resolution"),
            Some(&serde_json::Value::String("blocked".to_string()))
        );
        assert_eq!(fx.bus.events_of_type(EventType::OrderRejected, 10).len(), 1);

        // Owner unchanged.
        let claim = fx.store.get_primary_ownership("AAPL").await.unwrap().unwrap();
        assert_eq!(claim.strategy_id, a.id);
    }

    #[tokio::test]
    async fn test_create_order_priority_override_transfers_ownership() {
        let fx = Fixture::new();
        let d = fx.strategy("delta", 90).await;
        let e = fx.strategy("epsilon", 100).await;
        fx.manager
            .create_order("MSFT", OrderAction::Buy, 10, d.id)
            .await
            .unwrap();

        let order = fx
            .manager
            .create_order("MSFT", OrderAction::Buy, 20, e.id)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::OrderPending);
        let claim = fx.store.get_primary_ownership("MSFT").await.unwrap().unwrap();
        assert_eq!(claim.strategy_id, e.id);
        assert_eq!(
            fx.bus
                .events_of_type(EventType::OwnershipTransferred, 10)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_rejects_without_mutation() {
        let fx = Fixture::new();
        let s = fx.strategy("momo", 50).await;
        let mut order = fx
            .manager
            .create_order("TSLA", OrderAction::Buy, 5, s.id)
            .await
            .unwrap();

        let err = fx
            .manager
            .transition(&mut order, OrderStatus::FullyFilled, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::InvalidStateTransition { .. }));
        assert_eq!(order.status, OrderStatus::OrderPending);

        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OrderPending);
    }

    #[tokio::test]
    async fn test_lost_cas_race_reverts_and_reports() {
        let fx = Fixture::new();
        let s = fx.strategy("momo", 50).await;
        let mut order = fx
            .manager
            .create_order("TSLA", OrderAction::Buy, 5, s.id)
            .await
            .unwrap();

        // Another writer moves the stored row out from under this copy.
        let mut racer = fx.store.get_order(order.id).await.unwrap().unwrap();
        racer.status = OrderStatus::OrderSent;
        assert!(fx
            .store
            .update_order(&racer, OrderStatus::OrderPending)
            .await
            .unwrap());

        let err = fx
            .manager
            .transition(&mut order, OrderStatus::Failed, Some("late"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::InvalidStateTransition { .. }));
        // In-memory copy reverted; no phantom Failed state.
        assert_eq!(order.status, OrderStatus::OrderPending);
        assert!(order.error.is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle_through_wrappers() {
        let fx = Fixture::new();
        let s = fx.strategy("momo", 50).await;
        let mut order = fx
            .manager
            .create_order("NVDA", OrderAction::Buy, 100, s.id)
            .await
            .unwrap();

        fx.manager.order_sent(&mut order, "BRK-1234").await.unwrap();
        assert_eq!(order.broker_order_id.as_deref(), Some("BRK-1234"));

        fx.manager
            .partial_fill(&mut order, 40, dec!(118.20))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::PartialFilled);

        fx.manager.fully_filled(&mut order, dec!(118.35)).await.unwrap();
        assert_eq!(order.status, OrderStatus::FullyFilled);
        assert_eq!(order.filled_quantity, 100);

        assert_eq!(fx.bus.events_of_type(EventType::OrderSent, 10).len(), 1);
        assert_eq!(fx.bus.events_of_type(EventType::OrderFilled, 10).len(), 1);

        // Terminal: nothing more is accepted.
        let err = fx
            .manager
            .cancel(&mut order, "too late")
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_wrappers_walk_the_validation_and_failure_paths() {
        let fx = Fixture::new();
        let s = fx.strategy("momo", 50).await;

        // An externally staged order enters through receive_signal.
        let mut order = Order::new("AMD", OrderAction::Buy, 10, s.id);
        order.status = OrderStatus::Idle;
        fx.store.insert_order(&order).await.unwrap();

        fx.manager
            .receive_signal(&mut order, "staged intake")
            .await
            .unwrap();
        fx.manager.start_validation(&mut order).await.unwrap();
        fx.manager
            .validation_failed(&mut order, "quantity exceeds limit")
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.error.as_deref(), Some("quantity exceeds limit"));

        // A pending order that the broker refuses goes to Failed.
        let mut order = fx
            .manager
            .create_order("AMD", OrderAction::Buy, 5, s.id)
            .await
            .unwrap();
        fx.manager
            .order_failed(&mut order, "broker connection refused")
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(fx.bus.events_of_type(EventType::OrderFailed, 10).len(), 1);
    }

    #[tokio::test]
    async fn test_locked_ticker_rejects_even_higher_priority() {
        let fx = Fixture::new();
        let d = fx.strategy("delta", 90).await;
        let e = fx.strategy("epsilon", 100).await;
        fx.manager
            .create_order("NVDA", OrderAction::Buy, 10, d.id)
            .await
            .unwrap();
        fx.store
            .set_ownership_lock(
                "NVDA",
                Some(Utc::now() + chrono::Duration::days(30)),
                Some("earnings hold"),
            )
            .await
            .unwrap();

        let order = fx
            .manager
            .create_order("NVDA", OrderAction::Sell, 10, e.id)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.error.as_deref().unwrap().contains("locked"));

        // Incumbent keeps the claim.
        let claim = fx.store.get_primary_ownership("NVDA").await.unwrap().unwrap();
        assert_eq!(claim.strategy_id, d.id);
    }
}
