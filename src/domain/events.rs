use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{ConflictResolution, Order, OrderAction, OrderStatus};

/// Event types published by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OrderSent,
    OrderFilled,
    OrderCancelled,
    OrderRejected,
    OrderFailed,
    ConflictDetected,
    OrderBlockedByConflict,
    PriorityOverride,
    OwnershipTransferred,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderSent => "ORDER_SENT",
            EventType::OrderFilled => "ORDER_FILLED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::OrderRejected => "ORDER_REJECTED",
            EventType::OrderFailed => "ORDER_FAILED",
            EventType::ConflictDetected => "CONFLICT_DETECTED",
            EventType::OrderBlockedByConflict => "ORDER_BLOCKED_BY_CONFLICT",
            EventType::PriorityOverride => "PRIORITY_OVERRIDE",
            EventType::OwnershipTransferred => "OWNERSHIP_TRANSFERRED",
        }
    }

    /// The event published when an order enters `status`, where one exists.
    pub fn for_status(status: OrderStatus) -> Option<EventType> {
        match status {
            OrderStatus::OrderSent => Some(EventType::OrderSent),
            OrderStatus::FullyFilled => Some(EventType::OrderFilled),
            OrderStatus::Cancelled => Some(EventType::OrderCancelled),
            OrderStatus::Rejected => Some(EventType::OrderRejected),
            OrderStatus::Failed => Some(EventType::OrderFailed),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload for order lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEventData {
    pub order_id: Uuid,
    pub ticker: String,
    pub action: OrderAction,
    pub quantity: u64,
    pub strategy_id: Uuid,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub filled_price: Option<Decimal>,
    pub reason: Option<String>,
}

impl OrderEventData {
    pub fn from_order(order: &Order, reason: Option<&str>) -> Self {
        Self {
            order_id: order.id,
            ticker: order.ticker.clone(),
            action: order.action,
            quantity: order.quantity,
            strategy_id: order.strategy_id,
            status: order.status,
            filled_quantity: order.filled_quantity,
            filled_price: order.filled_price,
            reason: reason.map(str::to_string),
        }
    }
}

/// Payload for conflict arbitration events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEventData {
    pub ticker: String,
    pub action: OrderAction,
    pub requester_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub resolution: ConflictResolution,
    pub reasoning: String,
}

/// Payload for ownership transfer events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipEventData {
    pub ticker: String,
    pub from_strategy: Uuid,
    pub to_strategy: Uuid,
    pub reason: String,
}

/// Structured payload, tagged per event family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Order(OrderEventData),
    Conflict(ConflictEventData),
    Ownership(OwnershipEventData),
}

/// A published event; immutable once constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Derived from the payload for log correlation
    pub ticker: Option<String>,
    pub order_id: Option<Uuid>,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        let (ticker, order_id) = match &payload {
            EventPayload::Order(data) => (Some(data.ticker.clone()), Some(data.order_id)),
            EventPayload::Conflict(data) => (Some(data.ticker.clone()), None),
            EventPayload::Ownership(data) => (Some(data.ticker.clone()), None),
        };
        Self {
            event_type,
            payload,
            timestamp: Utc::now(),
            ticker,
            order_id,
        }
    }

    pub fn order(event_type: EventType, order: &Order, reason: Option<&str>) -> Self {
        Self::new(
            event_type,
            EventPayload::Order(OrderEventData::from_order(order, reason)),
        )
    }

    pub fn conflict(event_type: EventType, data: ConflictEventData) -> Self {
        Self::new(event_type, EventPayload::Conflict(data))
    }

    pub fn ownership(ticker: &str, from_strategy: Uuid, to_strategy: Uuid, reason: &str) -> Self {
        Self::new(
            EventType::OwnershipTransferred,
            EventPayload::Ownership(OwnershipEventData {
                ticker: ticker.to_string(),
                from_strategy,
                to_strategy,
                reason: reason.to_string(),
            }),
        )
    }
}
