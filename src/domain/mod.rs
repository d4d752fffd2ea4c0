pub mod events;
pub mod order;
pub mod state;
pub mod strategy;

pub use events::{
    ConflictEventData, Event, EventPayload, EventType, OrderEventData, OwnershipEventData,
};
pub use order::{Order, OrderAction};
pub use state::{OrderStatus, TransitionRecord};
pub use strategy::{
    ConflictLog, ConflictResolution, OwnershipKind, PositionOwnership, Strategy, TimeHorizon,
};
