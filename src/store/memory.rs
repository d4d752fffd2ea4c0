//! In-memory store for tests and dry runs
//!
//! Dashmap entries give per-row mutual exclusion, so the compare-and-swap
//! contracts of [`TradeStore`] hold under concurrent access just as the
//! row-locked SQL paths do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::TradeStore;
use crate::domain::{
    ConflictLog, Order, OrderStatus, OwnershipKind, PositionOwnership, Strategy,
};
use crate::error::{ArbiterError, Result};

#[derive(Default)]
pub struct MemoryStore {
    strategies: DashMap<Uuid, Strategy>,
    /// Claims per ticker; at most one primary among them
    ownerships: DashMap<String, Vec<PositionOwnership>>,
    conflict_logs: Mutex<Vec<ConflictLog>>,
    orders: DashMap<Uuid, Order>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn insert_strategy(&self, strategy: &Strategy) -> Result<()> {
        self.strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>> {
        Ok(self.strategies.get(&id).map(|s| s.value().clone()))
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self.strategies.iter().map(|s| s.value().clone()).collect())
    }

    async fn get_primary_ownership(&self, ticker: &str) -> Result<Option<PositionOwnership>> {
        Ok(self.ownerships.get(ticker).and_then(|claims| {
            claims
                .iter()
                .find(|c| c.kind == OwnershipKind::Primary)
                .cloned()
        }))
    }

    async fn insert_ownership(&self, ownership: &PositionOwnership) -> Result<()> {
        let mut claims = self.ownerships.entry(ownership.ticker.clone()).or_default();
        if ownership.kind == OwnershipKind::Primary
            && claims.iter().any(|c| c.kind == OwnershipKind::Primary)
        {
            return Err(ArbiterError::DuplicateOwnership(ownership.ticker.clone()));
        }
        claims.push(ownership.clone());
        Ok(())
    }

    async fn reassign_ownership(
        &self,
        ticker: &str,
        from: Uuid,
        to: Uuid,
        reason: &str,
    ) -> Result<bool> {
        let Some(mut claims) = self.ownerships.get_mut(ticker) else {
            return Ok(false);
        };
        let now = Utc::now();
        let Some(claim) = claims
            .iter_mut()
            .find(|c| c.kind == OwnershipKind::Primary)
        else {
            return Ok(false);
        };
        if claim.strategy_id != from || claim.is_locked(now) {
            return Ok(false);
        }
        claim.strategy_id = to;
        claim.reason = reason.to_string();
        claim.updated_at = now;
        Ok(true)
    }

    async fn set_ownership_lock(
        &self,
        ticker: &str,
        locked_until: Option<DateTime<Utc>>,
        lock_reason: Option<&str>,
    ) -> Result<bool> {
        let Some(mut claims) = self.ownerships.get_mut(ticker) else {
            return Ok(false);
        };
        let Some(claim) = claims
            .iter_mut()
            .find(|c| c.kind == OwnershipKind::Primary)
        else {
            return Ok(false);
        };
        claim.locked_until = locked_until;
        claim.lock_reason = lock_reason.map(str::to_string);
        claim.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_ownership(&self, ticker: &str, strategy_id: Uuid) -> Result<bool> {
        let Some(mut claims) = self.ownerships.get_mut(ticker) else {
            return Ok(false);
        };
        let before = claims.len();
        claims.retain(|c| !(c.kind == OwnershipKind::Primary && c.strategy_id == strategy_id));
        Ok(claims.len() < before)
    }

    async fn insert_conflict_log(&self, row: &ConflictLog) -> Result<()> {
        self.conflict_logs
            .lock()
            .expect("conflict log lock poisoned")
            .push(row.clone());
        Ok(())
    }

    async fn conflict_logs_for_ticker(&self, ticker: &str) -> Result<Vec<ConflictLog>> {
        Ok(self
            .conflict_logs
            .lock()
            .expect("conflict log lock poisoned")
            .iter()
            .filter(|row| row.ticker == ticker)
            .cloned()
            .collect())
    }

    async fn recent_conflict_logs(&self, limit: usize) -> Result<Vec<ConflictLog>> {
        let logs = self
            .conflict_logs
            .lock()
            .expect("conflict log lock poisoned");
        let skip = logs.len().saturating_sub(limit);
        Ok(logs.iter().skip(skip).cloned().collect())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.value().clone()))
    }

    async fn update_order(&self, order: &Order, expected: OrderStatus) -> Result<bool> {
        let Some(mut stored) = self.orders.get_mut(&order.id) else {
            return Err(ArbiterError::OrderNotFound(order.id));
        };
        if stored.status != expected {
            return Ok(false);
        }
        *stored = order.clone();
        Ok(true)
    }

    async fn set_manual_review(&self, id: Uuid, note: &str) -> Result<()> {
        let Some(mut stored) = self.orders.get_mut(&id) else {
            return Err(ArbiterError::OrderNotFound(id));
        };
        stored.needs_manual_review = true;
        stored.error = Some(note.to_string());
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn orders_in_states(&self, states: &[OrderStatus]) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| states.contains(&o.status))
            .map(|o| o.value().clone())
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}
