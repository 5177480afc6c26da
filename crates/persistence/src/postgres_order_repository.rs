use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{NewOrder, Order, OrderFilter, OrderStatus};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use crate::{OrderRepository, ShipOutcome, StoreError};

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    total_price: f64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row
            .status
            .parse()
            .map_err(|_| StoreError::InvalidRow(format!("order {} has status {}", row.id, row.status)))?;

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            total_price: row.total_price,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL implementation of OrderRepository
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &NewOrder) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO orders (user_id, total_price, status)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, total_price, status, created_at, updated_at
            "#,
        )
        .bind(order.user_id)
        .bind(order.total_price)
        .bind(order.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        info!(order_id = row.id, user_id = row.user_id, "Inserted order");
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, total_price, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound { entity: "order", id })?
            .try_into()
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, total_price, status, created_at, updated_at
            FROM orders
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY id
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} orders", rows.len());
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING id, user_id, total_price, status, created_at, updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let order: Order = row.ok_or(StoreError::NotFound { entity: "order", id })?.try_into()?;
        info!(order_id = id, status = %order.status, "Updated order status");
        Ok(order)
    }

    async fn update_total_price(&self, id: i64, total_price: f64) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET total_price = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING id, user_id, total_price, status, created_at, updated_at
            "#,
        )
        .bind(total_price)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let order: Order = row.ok_or(StoreError::NotFound { entity: "order", id })?.try_into()?;
        info!(order_id = id, total_price, "Updated order total");
        Ok(order)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "order", id });
        }

        info!(order_id = id, "Deleted order");
        Ok(())
    }

    async fn mark_shipped(&self, id: i64) -> Result<ShipOutcome, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = 'SHIPPED', updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING id, user_id, total_price, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ShipOutcome::Shipped(row.try_into()?)),
            // Either missing (NotFound) or no longer Pending
            None => self.get_by_id(id).await.map(ShipOutcome::AlreadyShipped),
        }
    }
}
