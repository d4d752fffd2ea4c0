//! Broker collaborator boundary
//!
//! Order placement and cancellation live outside this crate; recovery only
//! needs the broker's view of an order's status.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

/// Broker-reported ground truth for one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderReport {
    pub status: String,
    pub filled_quantity: u64,
    pub filled_price: Option<Decimal>,
}

/// Normalized broker order state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOrderState {
    Filled,
    Cancelled,
    PartiallyFilled,
    Open,
    Unknown(String),
}

impl BrokerOrderState {
    /// Map a raw broker status string onto the normalized set.
    ///
    /// Anything unrecognized is carried verbatim so recovery can surface it
    /// instead of guessing.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "filled" | "executed" | "matched" => BrokerOrderState::Filled,
            "cancelled" | "canceled" => BrokerOrderState::Cancelled,
            "partially_filled" | "partial" | "partial_fill" => BrokerOrderState::PartiallyFilled,
            "open" | "pending" | "live" | "working" | "accepted" => BrokerOrderState::Open,
            other => BrokerOrderState::Unknown(other.to_string()),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// The broker's current view of the order.
    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrderReport>;
}
