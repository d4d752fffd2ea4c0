use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ArbiterError, Result};

/// Order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order object exists but no signal has been accepted yet
    Idle,
    /// Signal accepted from a strategy, not yet validated
    SignalReceived,
    /// Conflict and sanity checks in progress
    Validating,
    /// Cleared validation, waiting to be sent to the broker
    OrderPending,
    /// Submitted to the broker, awaiting fills
    OrderSent,
    /// Some quantity filled, remainder still working
    PartialFilled,
    /// Entire quantity filled
    FullyFilled,
    /// Cancelled before completion
    Cancelled,
    /// Rejected during validation or by conflict arbitration
    Rejected,
    /// Submission or downstream failure
    Failed,
}

impl OrderStatus {
    /// States the recovery pass reconciles against the broker.
    pub const PENDING_STATES: [OrderStatus; 3] = [
        OrderStatus::OrderPending,
        OrderStatus::OrderSent,
        OrderStatus::PartialFilled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Idle => "IDLE",
            OrderStatus::SignalReceived => "SIGNAL_RECEIVED",
            OrderStatus::Validating => "VALIDATING",
            OrderStatus::OrderPending => "ORDER_PENDING",
            OrderStatus::OrderSent => "ORDER_SENT",
            OrderStatus::PartialFilled => "PARTIAL_FILLED",
            OrderStatus::FullyFilled => "FULLY_FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, target) {
            // From Idle
            (Idle, SignalReceived) => true,

            // From SignalReceived
            (SignalReceived, Validating) => true,
            (SignalReceived, Rejected) => true,

            // From Validating
            (Validating, OrderPending) => true, // Checks passed
            (Validating, Rejected) => true,     // Checks failed or conflict blocked

            // From OrderPending
            (OrderPending, OrderSent) => true,
            (OrderPending, Failed) => true, // Submission failed

            // From OrderSent
            (OrderSent, PartialFilled) => true,
            (OrderSent, FullyFilled) => true,
            (OrderSent, Cancelled) => true,

            // From PartialFilled
            (PartialFilled, FullyFilled) => true,
            (PartialFilled, Cancelled) => true,

            // Terminal states admit nothing; everything else is invalid
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<OrderStatus> {
        use OrderStatus::*;

        match self {
            Idle => vec![SignalReceived],
            SignalReceived => vec![Validating, Rejected],
            Validating => vec![OrderPending, Rejected],
            OrderPending => vec![OrderSent, Failed],
            OrderSent => vec![PartialFilled, FullyFilled, Cancelled],
            PartialFilled => vec![FullyFilled, Cancelled],
            FullyFilled | Cancelled | Rejected | Failed => vec![],
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::FullyFilled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    /// Does this state represent an order the broker may still act on?
    pub fn is_pending(&self) -> bool {
        Self::PENDING_STATES.contains(self)
    }

    /// Validate a transition, returning the illegal pair on failure.
    ///
    /// Never mutates anything; callers decide what to do with the error.
    pub fn validate_transition(current: OrderStatus, target: OrderStatus) -> Result<()> {
        if current.can_transition_to(target) {
            Ok(())
        } else {
            Err(ArbiterError::invalid_transition(
                current.as_str(),
                target.as_str(),
            ))
        }
    }

    /// All states, for exhaustive property checks.
    pub fn all() -> [OrderStatus; 10] {
        use OrderStatus::*;
        [
            Idle,
            SignalReceived,
            Validating,
            OrderPending,
            OrderSent,
            PartialFilled,
            FullyFilled,
            Cancelled,
            Rejected,
            Failed,
        ]
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(OrderStatus::Idle),
            "SIGNAL_RECEIVED" => Ok(OrderStatus::SignalReceived),
            "VALIDATING" => Ok(OrderStatus::Validating),
            "ORDER_PENDING" => Ok(OrderStatus::OrderPending),
            "ORDER_SENT" => Ok(OrderStatus::OrderSent),
            "PARTIAL_FILLED" => Ok(OrderStatus::PartialFilled),
            "FULLY_FILLED" => Ok(OrderStatus::FullyFilled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "FAILED" => Ok(OrderStatus::Failed),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Record of one performed transition (for the manager's in-memory history)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<&str>,
    ) -> Self {
        Self {
            order_id,
            from,
            to,
            reason: reason.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}
