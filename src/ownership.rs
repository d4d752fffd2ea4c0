//! Ownership transfer and locking
//!
//! A primary claim changes hands only here. Transfers are validated against
//! priority and lock state, executed as a compare-and-swap on the claim row,
//! audited, and published. Failed validations are business outcomes returned
//! as data; a claim held by someone other than the stated incumbent is a
//! precondition violation and raised as an error.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::domain::{ConflictLog, ConflictResolution, Event, PositionOwnership};
use crate::error::{ArbiterError, Result};
use crate::store::TradeStore;

/// Result of a transfer attempt
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
    pub new_owner_id: Option<Uuid>,
}

impl TransferOutcome {
    fn ok(to: Uuid, message: String) -> Self {
        Self {
            success: true,
            message,
            new_owner_id: Some(to),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            new_owner_id: None,
        }
    }
}

pub struct OwnershipService {
    store: Arc<dyn TradeStore>,
    bus: Arc<EventBus>,
}

impl OwnershipService {
    pub fn new(store: Arc<dyn TradeStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Record the initial primary claim for an unowned ticker.
    pub async fn claim_ownership(
        &self,
        ticker: &str,
        strategy_id: Uuid,
        reason: &str,
    ) -> Result<PositionOwnership> {
        let claim = PositionOwnership::primary(strategy_id, ticker, reason);
        self.store.insert_ownership(&claim).await?;
        info!("Strategy {} claimed {}", strategy_id, ticker);
        Ok(claim)
    }

    /// Move the primary claim on `ticker` from `from` to `to`.
    ///
    /// Validation order: the claim exists and is held by `from` (errors),
    /// the target exists and is active, the claim is unlocked, the target's
    /// priority is strictly greater (structured failures). Nothing mutates
    /// on any failure path.
    pub async fn transfer_ownership(
        &self,
        ticker: &str,
        from: Uuid,
        to: Uuid,
        reason: &str,
    ) -> Result<TransferOutcome> {
        let claim = self.store.get_primary_ownership(ticker).await?.ok_or_else(|| {
            ArbiterError::OwnershipInconsistency {
                ticker: ticker.to_string(),
                reason: "no primary claim to transfer".to_string(),
            }
        })?;

        if claim.strategy_id != from {
            return Err(ArbiterError::OwnershipInconsistency {
                ticker: ticker.to_string(),
                reason: format!(
                    "claim held by {}, not by stated incumbent {}",
                    claim.strategy_id, from
                ),
            });
        }

        let incumbent = self
            .store
            .get_strategy(from)
            .await?
            .ok_or(ArbiterError::StrategyNotFound(from))?;

        let target = match self.store.get_strategy(to).await? {
            Some(s) if s.active => s,
            Some(s) => {
                return self
                    .blocked_transfer(
                        &claim,
                        &incumbent.name,
                        incumbent.priority,
                        to,
                        Some(s.priority),
                        format!("target strategy '{}' is inactive", s.name),
                    )
                    .await;
            }
            None => {
                return self
                    .blocked_transfer(
                        &claim,
                        &incumbent.name,
                        incumbent.priority,
                        to,
                        None,
                        format!("target strategy {} not found", to),
                    )
                    .await;
            }
        };

        if claim.is_locked(Utc::now()) {
            let until = claim
                .locked_until
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            return self
                .blocked_transfer(
                    &claim,
                    &incumbent.name,
                    incumbent.priority,
                    to,
                    Some(target.priority),
                    format!("claim on {} locked until {}", ticker, until),
                )
                .await;
        }

        // Strict inequality; a tie never transfers.
        if target.priority <= incumbent.priority {
            return self
                .blocked_transfer(
                    &claim,
                    &incumbent.name,
                    incumbent.priority,
                    to,
                    Some(target.priority),
                    format!(
                        "target priority {} does not exceed incumbent priority {}",
                        target.priority, incumbent.priority
                    ),
                )
                .await;
        }

        let swapped = self
            .store
            .reassign_ownership(ticker, from, to, reason)
            .await?;
        if !swapped {
            // Lost the row to a concurrent transfer or a just-placed lock.
            warn!("Transfer of {} from {} raced and lost", ticker, from);
            return self
                .blocked_transfer(
                    &claim,
                    &incumbent.name,
                    incumbent.priority,
                    to,
                    Some(target.priority),
                    format!("concurrent transfer on {} won the race", ticker),
                )
                .await;
        }

        let row = ConflictLog::new(
            ticker,
            None,
            ConflictResolution::Transferred,
            reason,
            to,
            Some(target.priority),
            Some(from),
            Some(incumbent.priority),
            Some(claim.id),
        );
        self.store.insert_conflict_log(&row).await?;

        info!(
            "Ownership of {} transferred: {} -> {} ({})",
            ticker, incumbent.name, target.name, reason
        );
        self.bus
            .publish(Event::ownership(ticker, from, to, reason));

        Ok(TransferOutcome::ok(
            to,
            format!("{} now owns {}", target.name, ticker),
        ))
    }

    /// Place a time-boxed hold on the primary claim.
    pub async fn lock_ownership(
        &self,
        ticker: &str,
        duration: Duration,
        reason: &str,
    ) -> Result<()> {
        let until = Utc::now() + duration;
        let updated = self
            .store
            .set_ownership_lock(ticker, Some(until), Some(reason))
            .await?;
        if !updated {
            return Err(ArbiterError::OwnershipInconsistency {
                ticker: ticker.to_string(),
                reason: "no primary claim to lock".to_string(),
            });
        }
        info!("Locked {} until {} ({})", ticker, until.to_rfc3339(), reason);
        Ok(())
    }

    /// Clear the hold on the primary claim.
    pub async fn release_lock(&self, ticker: &str) -> Result<()> {
        let updated = self.store.set_ownership_lock(ticker, None, None).await?;
        if !updated {
            return Err(ArbiterError::OwnershipInconsistency {
                ticker: ticker.to_string(),
                reason: "no primary claim to unlock".to_string(),
            });
        }
        info!("Released lock on {}", ticker);
        Ok(())
    }

    /// Explicitly give up the primary claim.
    pub async fn release_ownership(&self, ticker: &str, strategy_id: Uuid) -> Result<bool> {
        let released = self.store.release_ownership(ticker, strategy_id).await?;
        if released {
            info!("Strategy {} released {}", strategy_id, ticker);
        }
        Ok(released)
    }

    /// Audit a refused transfer and return the structured failure.
    async fn blocked_transfer(
        &self,
        claim: &PositionOwnership,
        incumbent_name: &str,
        incumbent_priority: i32,
        target: Uuid,
        target_priority: Option<i32>,
        message: String,
    ) -> Result<TransferOutcome> {
        warn!(
            "Transfer of {} away from {} refused: {}",
            claim.ticker, incumbent_name, message
        );
        let row = ConflictLog::new(
            &claim.ticker,
            None,
            ConflictResolution::Blocked,
            &message,
            target,
            target_priority,
            Some(claim.strategy_id),
            Some(incumbent_priority),
            Some(claim.id),
        );
        self.store.insert_conflict_log(&row).await?;
        Ok(TransferOutcome::failed(message))
    }
}
