use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::OrderAction;

/// Trading horizon a strategy operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeHorizon {
    Scalp,
    Intraday,
    Swing,
    Position,
}

impl TimeHorizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeHorizon::Scalp => "scalp",
            TimeHorizon::Intraday => "intraday",
            TimeHorizon::Swing => "swing",
            TimeHorizon::Position => "position",
        }
    }
}

impl fmt::Display for TimeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TimeHorizon {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "scalp" => Ok(TimeHorizon::Scalp),
            "intraday" => Ok(TimeHorizon::Intraday),
            "swing" => Ok(TimeHorizon::Swing),
            "position" => Ok(TimeHorizon::Position),
            _ => Err(format!("Unknown time horizon: {}", s)),
        }
    }
}

/// A registered trading strategy
///
/// Created at seed/admin time; the core only ever reads `priority` and
/// `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub name: String,
    /// Total-ordered; a strictly greater value wins arbitration
    pub priority: i32,
    pub active: bool,
    pub time_horizon: TimeHorizon,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Strategy {
    pub fn new(name: &str, priority: i32, time_horizon: TimeHorizon) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            priority,
            active: true,
            time_horizon,
            config: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }
}

/// Kind of claim a strategy holds over a ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipKind {
    /// The single authoritative trading claim; the only kind arbitration sees
    Primary,
    Hedge,
    Monitor,
}

impl OwnershipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnershipKind::Primary => "primary",
            OwnershipKind::Hedge => "hedge",
            OwnershipKind::Monitor => "monitor",
        }
    }
}

impl TryFrom<&str> for OwnershipKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(OwnershipKind::Primary),
            "hedge" => Ok(OwnershipKind::Hedge),
            "monitor" => Ok(OwnershipKind::Monitor),
            _ => Err(format!("Unknown ownership kind: {}", s)),
        }
    }
}

/// A claim binding one strategy to one ticker
///
/// At most one `Primary` row exists per ticker at any instant. While
/// `locked_until` is in the future the row cannot be transferred, regardless
/// of requester priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOwnership {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub ticker: String,
    pub kind: OwnershipKind,
    pub locked_until: Option<DateTime<Utc>>,
    pub lock_reason: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PositionOwnership {
    pub fn primary(strategy_id: Uuid, ticker: &str, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            strategy_id,
            ticker: ticker.to_string(),
            kind: OwnershipKind::Primary,
            locked_until: None,
            lock_reason: None,
            reason: reason.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Is the claim locked at `now`?
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

/// Outcome of a conflict-resolution or transfer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// No conflicting claim; the requester may proceed
    Allowed,
    /// The requester may not act on the ticker
    Blocked,
    /// A strictly higher-priority requester may take the claim over
    PriorityOverride,
    /// Audit marker for a completed ownership transfer
    Transferred,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Allowed => "allowed",
            ConflictResolution::Blocked => "blocked",
            ConflictResolution::PriorityOverride => "priority_override",
            ConflictResolution::Transferred => "transferred",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ConflictResolution {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "allowed" => Ok(ConflictResolution::Allowed),
            "blocked" => Ok(ConflictResolution::Blocked),
            "priority_override" => Ok(ConflictResolution::PriorityOverride),
            "transferred" => Ok(ConflictResolution::Transferred),
            _ => Err(format!("Unknown conflict resolution: {}", s)),
        }
    }
}

/// Append-only audit record of a non-trivial arbitration decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictLog {
    pub id: Uuid,
    pub ticker: String,
    /// The order action under arbitration; absent for transfer audits
    pub action_attempted: Option<OrderAction>,
    /// Set when the attempted action was denied
    pub action_blocked: Option<OrderAction>,
    pub resolution: ConflictResolution,
    pub reasoning: String,
    pub requester_id: Uuid,
    pub requester_priority: Option<i32>,
    pub owner_id: Option<Uuid>,
    pub owner_priority: Option<i32>,
    pub ownership_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ConflictLog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticker: &str,
        action: Option<OrderAction>,
        resolution: ConflictResolution,
        reasoning: &str,
        requester_id: Uuid,
        requester_priority: Option<i32>,
        owner_id: Option<Uuid>,
        owner_priority: Option<i32>,
        ownership_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            action_attempted: action,
            action_blocked: (resolution == ConflictResolution::Blocked)
                .then_some(action)
                .flatten(),
            resolution,
            reasoning: reasoning.to_string(),
            requester_id,
            requester_priority,
            owner_id,
            owner_priority,
            ownership_id,
            created_at: Utc::now(),
        }
    }
}
