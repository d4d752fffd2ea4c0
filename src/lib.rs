pub mod broker;
pub mod bus;
pub mod config;
pub mod conflict;
pub mod domain;
pub mod error;
pub mod manager;
pub mod ownership;
pub mod recovery;
pub mod store;

pub use broker::{BrokerClient, BrokerOrderReport, BrokerOrderState};
pub use bus::{EventBus, SubscriptionId};
pub use config::AppConfig;
pub use conflict::{ConflictCheck, ConflictDetector};
pub use domain::{
    ConflictLog, ConflictResolution, Event, EventPayload, EventType, Order, OrderAction,
    OrderStatus, OwnershipKind, PositionOwnership, Strategy, TimeHorizon, TransitionRecord,
};
pub use error::{ArbiterError, Result};
pub use manager::OrderManager;
pub use ownership::{OwnershipService, TransferOutcome};
pub use recovery::{OrderRecovery, RecoverySummary};
pub use store::{MemoryStore, PostgresStore, TradeStore};
