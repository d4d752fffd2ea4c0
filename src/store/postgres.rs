use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::TradeStore;
use crate::domain::{
    ConflictLog, ConflictResolution, Order, OrderAction, OrderStatus, OwnershipKind,
    PositionOwnership, Strategy, TimeHorizon,
};
use crate::error::{ArbiterError, Result};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_strategy(row: &PgRow) -> Result<Strategy> {
        let horizon: String = row.get("time_horizon");
        Ok(Strategy {
            id: row.get("id"),
            name: row.get("name"),
            priority: row.get("priority"),
            active: row.get("active"),
            time_horizon: TimeHorizon::try_from(horizon.as_str())
                .map_err(ArbiterError::InvalidState)?,
            config: row.get("config"),
            created_at: row.get("created_at"),
        })
    }

    fn map_ownership(row: &PgRow) -> Result<PositionOwnership> {
        let kind: String = row.get("kind");
        Ok(PositionOwnership {
            id: row.get("id"),
            strategy_id: row.get("strategy_id"),
            ticker: row.get("ticker"),
            kind: OwnershipKind::try_from(kind.as_str()).map_err(ArbiterError::InvalidState)?,
            locked_until: row.get("locked_until"),
            lock_reason: row.get("lock_reason"),
            reason: row.get("reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn map_conflict_log(row: &PgRow) -> Result<ConflictLog> {
        let attempted: Option<String> = row.get("action_attempted");
        let blocked: Option<String> = row.get("action_blocked");
        let resolution: String = row.get("resolution");
        Ok(ConflictLog {
            id: row.get("id"),
            ticker: row.get("ticker"),
            action_attempted: attempted
                .map(|a| OrderAction::try_from(a.as_str()))
                .transpose()
                .map_err(ArbiterError::InvalidState)?,
            action_blocked: blocked
                .map(|a| OrderAction::try_from(a.as_str()))
                .transpose()
                .map_err(ArbiterError::InvalidState)?,
            resolution: ConflictResolution::try_from(resolution.as_str())
                .map_err(ArbiterError::InvalidState)?,
            reasoning: row.get("reasoning"),
            requester_id: row.get("requester_id"),
            requester_priority: row.get("requester_priority"),
            owner_id: row.get("owner_id"),
            owner_priority: row.get("owner_priority"),
            ownership_id: row.get("ownership_id"),
            created_at: row.get("created_at"),
        })
    }

    fn map_order(row: &PgRow) -> Result<Order> {
        let action: String = row.get("action");
        let status: String = row.get("status");
        let metadata: serde_json::Value = row.get("metadata");
        Ok(Order {
            id: row.get("id"),
            ticker: row.get("ticker"),
            action: OrderAction::try_from(action.as_str()).map_err(ArbiterError::InvalidState)?,
            quantity: row.get::<i64, _>("quantity") as u64,
            strategy_id: row.get("strategy_id"),
            status: OrderStatus::try_from(status.as_str()).map_err(ArbiterError::InvalidState)?,
            broker_order_id: row.get("broker_order_id"),
            filled_quantity: row.get::<i64, _>("filled_quantity") as u64,
            filled_price: row.get::<Option<Decimal>, _>("filled_price"),
            error: row.get("error"),
            needs_manual_review: row.get("needs_manual_review"),
            metadata: match metadata {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl TradeStore for PostgresStore {
    // ==================== Strategies ====================

    async fn insert_strategy(&self, strategy: &Strategy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, priority, active, time_horizon, config, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(strategy.id)
        .bind(&strategy.name)
        .bind(strategy.priority)
        .bind(strategy.active)
        .bind(strategy.time_horizon.as_str())
        .bind(&strategy.config)
        .bind(strategy.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, priority, active, time_horizon, config, created_at
            FROM strategies WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_strategy).transpose()
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, priority, active, time_horizon, config, created_at
            FROM strategies ORDER BY priority DESC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_strategy).collect()
    }

    // ==================== Ownership ====================

    async fn get_primary_ownership(&self, ticker: &str) -> Result<Option<PositionOwnership>> {
        let row = sqlx::query(
            r#"
            SELECT id, strategy_id, ticker, kind, locked_until, lock_reason, reason,
                   created_at, updated_at
            FROM position_ownerships
            WHERE ticker = $1 AND kind = 'primary'
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_ownership).transpose()
    }

    async fn insert_ownership(&self, ownership: &PositionOwnership) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO position_ownerships
                (id, strategy_id, ticker, kind, locked_until, lock_reason, reason,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(ownership.id)
        .bind(ownership.strategy_id)
        .bind(&ownership.ticker)
        .bind(ownership.kind.as_str())
        .bind(ownership.locked_until)
        .bind(&ownership.lock_reason)
        .bind(&ownership.reason)
        .bind(ownership.created_at)
        .bind(ownership.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some("uniq_primary_ownership_per_ticker") =>
            {
                Err(ArbiterError::DuplicateOwnership(ownership.ticker.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reassign_ownership(
        &self,
        ticker: &str,
        from: Uuid,
        to: Uuid,
        reason: &str,
    ) -> Result<bool> {
        // Single conditional UPDATE: the WHERE clause is the compare half of
        // the swap, the row lock the database takes is the serialization.
        let result = sqlx::query(
            r#"
            UPDATE position_ownerships
            SET strategy_id = $3, reason = $4, updated_at = NOW()
            WHERE ticker = $1 AND kind = 'primary' AND strategy_id = $2
              AND (locked_until IS NULL OR locked_until <= NOW())
            "#,
        )
        .bind(ticker)
        .bind(from)
        .bind(to)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        debug!(
            "Reassign {} from {} to {}: {} row(s)",
            ticker,
            from,
            to,
            result.rows_affected()
        );
        Ok(result.rows_affected() > 0)
    }

    async fn set_ownership_lock(
        &self,
        ticker: &str,
        locked_until: Option<DateTime<Utc>>,
        lock_reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE position_ownerships
            SET locked_until = $2, lock_reason = $3, updated_at = NOW()
            WHERE ticker = $1 AND kind = 'primary'
            "#,
        )
        .bind(ticker)
        .bind(locked_until)
        .bind(lock_reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_ownership(&self, ticker: &str, strategy_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM position_ownerships
            WHERE ticker = $1 AND kind = 'primary' AND strategy_id = $2
            "#,
        )
        .bind(ticker)
        .bind(strategy_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Conflict log ====================

    async fn insert_conflict_log(&self, row: &ConflictLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conflict_logs
                (id, ticker, action_attempted, action_blocked, resolution, reasoning,
                 requester_id, requester_priority, owner_id, owner_priority, ownership_id,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(row.id)
        .bind(&row.ticker)
        .bind(row.action_attempted.map(|a| a.as_str()))
        .bind(row.action_blocked.map(|a| a.as_str()))
        .bind(row.resolution.as_str())
        .bind(&row.reasoning)
        .bind(row.requester_id)
        .bind(row.requester_priority)
        .bind(row.owner_id)
        .bind(row.owner_priority)
        .bind(row.ownership_id)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn conflict_logs_for_ticker(&self, ticker: &str) -> Result<Vec<ConflictLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ticker, action_attempted, action_blocked, resolution, reasoning,
                   requester_id, requester_priority, owner_id, owner_priority, ownership_id,
                   created_at
            FROM conflict_logs
            WHERE ticker = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_conflict_log).collect()
    }

    async fn recent_conflict_logs(&self, limit: usize) -> Result<Vec<ConflictLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ticker, action_attempted, action_blocked, resolution, reasoning,
                   requester_id, requester_priority, owner_id, owner_priority, ownership_id,
                   created_at
            FROM conflict_logs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut logs: Vec<ConflictLog> = rows
            .iter()
            .map(Self::map_conflict_log)
            .collect::<Result<_>>()?;
        logs.reverse();
        Ok(logs)
    }

    // ==================== Orders ====================

    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, ticker, action, quantity, strategy_id, status, broker_order_id,
                 filled_quantity, filled_price, error, needs_manual_review, metadata,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id)
        .bind(&order.ticker)
        .bind(order.action.as_str())
        .bind(order.quantity as i64)
        .bind(order.strategy_id)
        .bind(order.status.as_str())
        .bind(&order.broker_order_id)
        .bind(order.filled_quantity as i64)
        .bind(order.filled_price)
        .bind(&order.error)
        .bind(order.needs_manual_review)
        .bind(serde_json::Value::Object(order.metadata.clone()))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, ticker, action, quantity, strategy_id, status, broker_order_id,
                   filled_quantity, filled_price, error, needs_manual_review, metadata,
                   created_at, updated_at
            FROM orders WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_order).transpose()
    }

    async fn update_order(&self, order: &Order, expected: OrderStatus) -> Result<bool> {
        // Status CAS: the guard on the previous status makes concurrent
        // writers lose explicitly instead of overwriting each other.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, broker_order_id = $4, filled_quantity = $5, filled_price = $6,
                error = $7, needs_manual_review = $8, metadata = $9, updated_at = $10
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order.id)
        .bind(expected.as_str())
        .bind(order.status.as_str())
        .bind(&order.broker_order_id)
        .bind(order.filled_quantity as i64)
        .bind(order.filled_price)
        .bind(&order.error)
        .bind(order.needs_manual_review)
        .bind(serde_json::Value::Object(order.metadata.clone()))
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_manual_review(&self, id: Uuid, note: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET needs_manual_review = TRUE, error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ArbiterError::OrderNotFound(id));
        }
        Ok(())
    }

    async fn orders_in_states(&self, states: &[OrderStatus]) -> Result<Vec<Order>> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, ticker, action, quantity, strategy_id, status, broker_order_id,
                   filled_quantity, filled_price, error, needs_manual_review, metadata,
                   created_at, updated_at
            FROM orders
            WHERE status = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_order).collect()
    }
}
