//! Conflict detection
//!
//! Decides whether a strategy may act on a ticker, against the current
//! primary ownership claim. The detector only reads ownership; every
//! non-trivial decision is appended to the conflict log and published, but
//! the claim itself is never mutated here.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::domain::{
    ConflictEventData, ConflictLog, ConflictResolution, Event, EventType, OrderAction,
};
use crate::error::Result;
use crate::store::TradeStore;

/// Outcome of a conflict check
#[derive(Debug, Clone)]
pub struct ConflictCheck {
    pub resolution: ConflictResolution,
    pub can_proceed: bool,
    pub reasoning: String,
    pub owner_id: Option<Uuid>,
    pub ownership_id: Option<Uuid>,
}

impl ConflictCheck {
    pub fn has_conflict(&self) -> bool {
        self.resolution != ConflictResolution::Allowed
    }

    fn allowed(reasoning: String, owner_id: Option<Uuid>, ownership_id: Option<Uuid>) -> Self {
        Self {
            resolution: ConflictResolution::Allowed,
            can_proceed: true,
            reasoning,
            owner_id,
            ownership_id,
        }
    }
}

pub struct ConflictDetector {
    store: Arc<dyn TradeStore>,
    bus: Arc<EventBus>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn TradeStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Decide whether `requester_id` may perform `action` on `ticker`.
    ///
    /// Resolution is a pure function of (requester priority, owner priority,
    /// lock state, same-owner, no-owner); the side effects are one audit row
    /// and the conflict events for every outcome other than a plain allow.
    pub async fn check_conflict(
        &self,
        requester_id: Uuid,
        ticker: &str,
        action: OrderAction,
        quantity: u64,
    ) -> Result<ConflictCheck> {
        debug!(
            "Conflict check: {} {} x{} by {}",
            action, ticker, quantity, requester_id
        );

        // Requester is validated before ownership is examined.
        let requester = self.store.get_strategy(requester_id).await?;
        let requester = match requester {
            Some(s) if s.active => s,
            Some(s) => {
                let check = ConflictCheck {
                    resolution: ConflictResolution::Blocked,
                    can_proceed: false,
                    reasoning: format!("strategy '{}' is inactive", s.name),
                    owner_id: None,
                    ownership_id: None,
                };
                self.audit(&check, requester_id, Some(s.priority), None, ticker, action)
                    .await?;
                return Ok(check);
            }
            None => {
                let check = ConflictCheck {
                    resolution: ConflictResolution::Blocked,
                    can_proceed: false,
                    reasoning: format!("unknown strategy {}", requester_id),
                    owner_id: None,
                    ownership_id: None,
                };
                self.audit(&check, requester_id, None, None, ticker, action)
                    .await?;
                return Ok(check);
            }
        };

        let Some(claim) = self.store.get_primary_ownership(ticker).await? else {
            return Ok(ConflictCheck::allowed(
                format!("no primary owner for {}", ticker),
                None,
                None,
            ));
        };

        if claim.strategy_id == requester.id {
            return Ok(ConflictCheck::allowed(
                format!("{} already owns {}", requester.name, ticker),
                Some(claim.strategy_id),
                Some(claim.id),
            ));
        }

        let owner = self.store.get_strategy(claim.strategy_id).await?;
        let owner_priority = owner.as_ref().map(|o| o.priority);
        let owner_name = owner
            .as_ref()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| claim.strategy_id.to_string());

        let check = match owner_priority {
            Some(op) if requester.priority > op => {
                if claim.is_locked(Utc::now()) {
                    // Lock beats priority, always.
                    let until = claim
                        .locked_until
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    ConflictCheck {
                        resolution: ConflictResolution::Blocked,
                        can_proceed: false,
                        reasoning: format!(
                            "{} holds {} locked until {} ({})",
                            owner_name,
                            ticker,
                            until,
                            claim.lock_reason.as_deref().unwrap_or("no reason given")
                        ),
                        owner_id: Some(claim.strategy_id),
                        ownership_id: Some(claim.id),
                    }
                } else {
                    ConflictCheck {
                        resolution: ConflictResolution::PriorityOverride,
                        can_proceed: true,
                        reasoning: format!(
                            "{} (priority {}) overrides {} (priority {}) on {}",
                            requester.name, requester.priority, owner_name, op, ticker
                        ),
                        owner_id: Some(claim.strategy_id),
                        ownership_id: Some(claim.id),
                    }
                }
            }
            Some(op) => ConflictCheck {
                resolution: ConflictResolution::Blocked,
                can_proceed: false,
                reasoning: format!(
                    "insufficient priority: {} ({}) vs owner {} ({}) on {}",
                    requester.name, requester.priority, owner_name, op, ticker
                ),
                owner_id: Some(claim.strategy_id),
                ownership_id: Some(claim.id),
            },
            None => {
                // Claim points at a strategy the store no longer knows.
                warn!(
                    "Ownership {} on {} references missing strategy {}",
                    claim.id, ticker, claim.strategy_id
                );
                ConflictCheck {
                    resolution: ConflictResolution::Blocked,
                    can_proceed: false,
                    reasoning: format!(
                        "owner strategy {} not found for {}",
                        claim.strategy_id, ticker
                    ),
                    owner_id: Some(claim.strategy_id),
                    ownership_id: Some(claim.id),
                }
            }
        };

        self.audit(
            &check,
            requester.id,
            Some(requester.priority),
            owner_priority,
            ticker,
            action,
        )
        .await?;
        Ok(check)
    }

    /// One conflict-log row plus the event fan-out for a non-allowed outcome.
    async fn audit(
        &self,
        check: &ConflictCheck,
        requester_id: Uuid,
        requester_priority: Option<i32>,
        owner_priority: Option<i32>,
        ticker: &str,
        action: OrderAction,
    ) -> Result<()> {
        let row = ConflictLog::new(
            ticker,
            Some(action),
            check.resolution,
            &check.reasoning,
            requester_id,
            requester_priority,
            check.owner_id,
            owner_priority,
            check.ownership_id,
        );
        self.store.insert_conflict_log(&row).await?;

        info!(
            "Conflict on {}: {} ({})",
            ticker, check.resolution, check.reasoning
        );

        let data = ConflictEventData {
            ticker: ticker.to_string(),
            action,
            requester_id,
            owner_id: check.owner_id,
            resolution: check.resolution,
            reasoning: check.reasoning.clone(),
        };
        self.bus
            .publish(Event::conflict(EventType::ConflictDetected, data.clone()));
        match check.resolution {
            ConflictResolution::Blocked => {
                self.bus
                    .publish(Event::conflict(EventType::OrderBlockedByConflict, data));
            }
            ConflictResolution::PriorityOverride => {
                self.bus
                    .publish(Event::conflict(EventType::PriorityOverride, data));
            }
            _ => {}
        }
        Ok(())
    }
}
