use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderStatus;

/// Order action (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Buy => "BUY",
            OrderAction::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderAction {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(OrderAction::Buy),
            "SELL" => Ok(OrderAction::Sell),
            _ => Err(format!("Unknown order action: {}", s)),
        }
    }
}

/// Order (tracked in our system)
///
/// The `status` field is owned by the order manager; nothing else writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub ticker: String,
    pub action: OrderAction,
    pub quantity: u64,
    pub strategy_id: Uuid,
    pub status: OrderStatus,
    pub broker_order_id: Option<String>,
    pub filled_quantity: u64,
    pub filled_price: Option<Decimal>,
    pub error: Option<String>,
    pub needs_manual_review: bool,
    /// Open-ended annotations that are never load-bearing
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order at signal intake.
    pub fn new(ticker: &str, action: OrderAction, quantity: u64, strategy_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            action,
            quantity,
            strategy_id,
            status: OrderStatus::SignalReceived,
            broker_order_id: None,
            filled_quantity: 0,
            filled_price: None,
            error: None,
            needs_manual_review: false,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Calculate fill percentage
    pub fn fill_pct(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.filled_quantity) / Decimal::from(self.quantity) * Decimal::from(100)
    }

    /// Check if fully filled
    pub fn is_fully_filled(&self) -> bool {
        self.status == OrderStatus::FullyFilled && self.filled_quantity >= self.quantity
    }

    /// Dollar value of the executed portion
    pub fn fill_value(&self) -> Decimal {
        match self.filled_price {
            Some(price) => price * Decimal::from(self.filled_quantity),
            None => Decimal::ZERO,
        }
    }
}
