//! End-to-end arbitration scenarios over the full service stack.

use std::sync::Arc;

use arbiter::bus::EventBus;
use arbiter::conflict::ConflictDetector;
use arbiter::domain::{
    ConflictResolution, EventType, OrderAction, OrderStatus, Strategy, TimeHorizon,
};
use arbiter::manager::OrderManager;
use arbiter::ownership::OwnershipService;
use arbiter::store::{MemoryStore, TradeStore};

struct Stack {
    store: Arc<MemoryStore>,
    bus: Arc<EventBus>,
    manager: Arc<OrderManager>,
    ownership: Arc<OwnershipService>,
}

fn stack() -> Stack {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let detector = Arc::new(ConflictDetector::new(store.clone(), bus.clone()));
    let ownership = Arc::new(OwnershipService::new(store.clone(), bus.clone()));
    let manager = Arc::new(OrderManager::new(
        store.clone(),
        bus.clone(),
        detector,
        ownership.clone(),
    ));
    Stack {
        store,
        bus,
        manager,
        ownership,
    }
}

async fn seed_strategy(store: &MemoryStore, name: &str, priority: i32) -> Strategy {
    let s = Strategy::new(name, priority, TimeHorizon::Intraday);
    store.insert_strategy(&s).await.unwrap();
    s
}

#[tokio::test]
async fn lower_priority_challenger_is_blocked_with_one_audit_row() {
    let stack = stack();
    let a = seed_strategy(&stack.store, "alpha", 100).await;
    let b = seed_strategy(&stack.store, "beta", 50).await;

    // Strategy A takes AAPL by trading it first.
    let first = stack
        .manager
        .create_order("AAPL", OrderAction::Buy, 10, a.id)
        .await
        .unwrap();
    assert_eq!(first.status, OrderStatus::OrderPending);

    // Strategy B's sell attempt is refused as data, not as an error.
    let second = stack
        .manager
        .create_order("AAPL", OrderAction::Sell, 10, b.id)
        .await
        .unwrap();
    assert_eq!(second.status, OrderStatus::Rejected);

    let logs = stack.store.conflict_logs_for_ticker("AAPL").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].resolution, ConflictResolution::Blocked);
    assert_eq!(logs[0].action_blocked, Some(OrderAction::Sell));
    assert_eq!(logs[0].requester_priority, Some(50));
    assert_eq!(logs[0].owner_priority, Some(100));

    assert_eq!(
        stack
            .bus
            .events_of_type(EventType::OrderBlockedByConflict, 10)
            .len(),
        1
    );
    assert_eq!(stack.bus.events_of_type(EventType::OrderRejected, 10).len(), 1);
}

#[tokio::test]
async fn unowned_ticker_is_allowed_with_no_audit_rows() {
    let stack = stack();
    let c = seed_strategy(&stack.store, "carry", 30).await;

    let order = stack
        .manager
        .create_order("TSLA", OrderAction::Buy, 5, c.id)
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::OrderPending);
    assert!(stack
        .store
        .conflict_logs_for_ticker("TSLA")
        .await
        .unwrap()
        .is_empty());

    // The first acquirer now holds the primary claim.
    let claim = stack
        .store
        .get_primary_ownership("TSLA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.strategy_id, c.id);
}

#[tokio::test]
async fn higher_priority_challenger_takes_over_ownership() {
    let stack = stack();
    let d = seed_strategy(&stack.store, "delta", 90).await;
    let e = seed_strategy(&stack.store, "epsilon", 100).await;

    stack
        .manager
        .create_order("MSFT", OrderAction::Buy, 10, d.id)
        .await
        .unwrap();

    let order = stack
        .manager
        .create_order("MSFT", OrderAction::Buy, 20, e.id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::OrderPending);

    let claim = stack
        .store
        .get_primary_ownership("MSFT")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.strategy_id, e.id);

    // Both strategies visible to the operator surface, highest priority first.
    let strategies = stack.store.list_strategies().await.unwrap();
    assert_eq!(strategies.len(), 2);

    // One override decision, one transfer audit.
    let logs = stack.store.conflict_logs_for_ticker("MSFT").await.unwrap();
    let overrides = logs
        .iter()
        .filter(|l| l.resolution == ConflictResolution::PriorityOverride)
        .count();
    let transfers = logs
        .iter()
        .filter(|l| l.resolution == ConflictResolution::Transferred)
        .count();
    assert_eq!(overrides, 1);
    assert_eq!(transfers, 1);

    assert_eq!(
        stack.bus.events_of_type(EventType::PriorityOverride, 10).len(),
        1
    );
    assert_eq!(
        stack
            .bus
            .events_of_type(EventType::OwnershipTransferred, 10)
            .len(),
        1
    );

    // The recent-window read sees the same two audit rows.
    let recent = stack.store.recent_conflict_logs(10).await.unwrap();
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn locked_claim_blocks_regardless_of_priority() {
    let stack = stack();
    let d = seed_strategy(&stack.store, "delta", 90).await;
    let e = seed_strategy(&stack.store, "epsilon", 100).await;

    stack
        .manager
        .create_order("NVDA", OrderAction::Buy, 10, d.id)
        .await
        .unwrap();
    stack
        .ownership
        .lock_ownership("NVDA", chrono::Duration::days(30), "earnings hold")
        .await
        .unwrap();

    let order = stack
        .manager
        .create_order("NVDA", OrderAction::Sell, 10, e.id)
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Rejected);
    let reason = order.error.as_deref().unwrap();
    assert!(reason.contains("locked"), "reasoning must name the lock: {reason}");

    let claim = stack
        .store
        .get_primary_ownership("NVDA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.strategy_id, d.id);
}

#[tokio::test]
async fn bus_history_reconstructs_the_day() {
    let stack = stack();
    let a = seed_strategy(&stack.store, "alpha", 100).await;
    let b = seed_strategy(&stack.store, "beta", 50).await;

    stack
        .manager
        .create_order("AAPL", OrderAction::Buy, 10, a.id)
        .await
        .unwrap();
    stack
        .manager
        .create_order("AAPL", OrderAction::Sell, 10, b.id)
        .await
        .unwrap();

    let today = chrono::Utc::now().date_naive();
    let events = stack.bus.events_for_day(today);
    assert!(!events.is_empty());
    // Conflict, block, and rejection all landed on the same day's record.
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::ConflictDetected));
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::OrderRejected));
}
