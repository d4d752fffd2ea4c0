use thiserror::Error;
use uuid::Uuid;

/// Main error type for the arbitration engine
#[derive(Error, Debug)]
pub enum ArbiterError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Lookup errors (precondition class: a reference that must exist does not)
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(Uuid),

    // Ownership errors (precondition class: the store contradicts the caller)
    #[error("Ownership inconsistency for {ticker}: {reason}")]
    OwnershipInconsistency { ticker: String, reason: String },

    #[error("Duplicate primary ownership for {0}")]
    DuplicateOwnership(String),

    // Broker errors
    #[error("Broker status unavailable: {0}")]
    BrokerUnavailable(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ArbiterError
pub type Result<T> = std::result::Result<T, ArbiterError>;

impl ArbiterError {
    /// Build the illegal-transition error for a `(from, to)` pair.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        ArbiterError::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}
