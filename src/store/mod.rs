//! Persistence boundary
//!
//! The core talks to storage through [`TradeStore`]. Two implementations:
//! [`PostgresStore`] for production and [`MemoryStore`] for tests and dry
//! runs. Ownership reassignment and order-status updates are
//! compare-and-swap operations in both, which is what serializes concurrent
//! writers on the same row.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ConflictLog, Order, OrderStatus, PositionOwnership, Strategy};
use crate::error::Result;

#[async_trait]
pub trait TradeStore: Send + Sync {
    // ==================== Strategies ====================

    async fn insert_strategy(&self, strategy: &Strategy) -> Result<()>;

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>>;

    async fn list_strategies(&self) -> Result<Vec<Strategy>>;

    // ==================== Ownership ====================

    /// The primary claim for a ticker, if any.
    async fn get_primary_ownership(&self, ticker: &str) -> Result<Option<PositionOwnership>>;

    /// Insert a new claim. Fails if a primary claim already exists for the
    /// ticker and the new claim is primary.
    async fn insert_ownership(&self, ownership: &PositionOwnership) -> Result<()>;

    /// Atomically reassign the primary claim from one strategy to another.
    ///
    /// Returns false when the row is no longer held by `from` or is locked:
    /// the compare-and-swap lost. No mutation happens in that case.
    async fn reassign_ownership(
        &self,
        ticker: &str,
        from: Uuid,
        to: Uuid,
        reason: &str,
    ) -> Result<bool>;

    /// Set or clear the time-boxed lock on the primary claim.
    ///
    /// Returns false when no primary claim exists.
    async fn set_ownership_lock(
        &self,
        ticker: &str,
        locked_until: Option<DateTime<Utc>>,
        lock_reason: Option<&str>,
    ) -> Result<bool>;

    /// Explicitly release the primary claim held by `strategy_id`.
    ///
    /// The only deletion path for ownership rows. Returns false when the
    /// ticker is not held by that strategy.
    async fn release_ownership(&self, ticker: &str, strategy_id: Uuid) -> Result<bool>;

    // ==================== Conflict log ====================

    /// Append one audit row. Rows are never updated or deleted.
    async fn insert_conflict_log(&self, row: &ConflictLog) -> Result<()>;

    async fn conflict_logs_for_ticker(&self, ticker: &str) -> Result<Vec<ConflictLog>>;

    async fn recent_conflict_logs(&self, limit: usize) -> Result<Vec<ConflictLog>>;

    // ==================== Orders ====================

    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    /// Persist an order's mutable fields, guarded on the status the caller
    /// read.
    ///
    /// Returns false without mutating when the stored status is no longer
    /// `expected`; a concurrent writer got there first.
    async fn update_order(&self, order: &Order, expected: OrderStatus) -> Result<bool>;

    /// Flag an order for manual attention without touching its status.
    async fn set_manual_review(&self, id: Uuid, note: &str) -> Result<()>;

    /// All orders currently in one of the given states.
    async fn orders_in_states(&self, states: &[OrderStatus]) -> Result<Vec<Order>>;
}
