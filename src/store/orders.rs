//! Order repository: the transport order lifecycle rows plus their
//! append-only history log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edge_types::{OrderStatus, OrderType};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub uuid: Uuid,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub payload_id: Option<i64>,
    pub retrieve_empty: bool,
    pub quantity: f64,
    pub delivery_node: Option<String>,
    pub pickup_node: Option<String>,
    pub staging_node: Option<String>,
    pub load_type: Option<String>,
    /// What this order carries, independent of the linked payload's own
    /// static description. Copied into the payload's `has_description` when
    /// a retrieve order completes delivered+confirmed (`spec.md` §4.F).
    pub description: Option<String>,
    pub waybill_id: Option<String>,
    pub eta: Option<DateTime<Utc>>,
    pub final_count: Option<f64>,
    pub count_confirmed: bool,
    pub auto_confirm: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub uuid: Uuid,
    pub order_type: OrderType,
    pub payload_id: Option<i64>,
    pub retrieve_empty: bool,
    pub quantity: f64,
    pub delivery_node: Option<String>,
    pub pickup_node: Option<String>,
    pub staging_node: Option<String>,
    pub load_type: Option<String>,
    pub description: Option<String>,
    pub auto_confirm: bool,
    pub count_confirmed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OrderStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown order status {0}")]
    UnknownStatus(String),
    #[error("unknown order type {0}")]
    UnknownType(String),
}

impl From<OrderStoreError> for anyhow::Error {
    fn from(e: OrderStoreError) -> Self {
        anyhow::anyhow!(e)
    }
}

pub fn status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Submitted => "submitted",
        OrderStatus::Acknowledged => "acknowledged",
        OrderStatus::InTransit => "in_transit",
        OrderStatus::Delivered => "delivered",
        OrderStatus::Confirmed => "confirmed",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, OrderStoreError> {
    Ok(match raw {
        "pending" => OrderStatus::Pending,
        "submitted" => OrderStatus::Submitted,
        "acknowledged" => OrderStatus::Acknowledged,
        "in_transit" => OrderStatus::InTransit,
        "delivered" => OrderStatus::Delivered,
        "confirmed" => OrderStatus::Confirmed,
        "cancelled" => OrderStatus::Cancelled,
        "failed" => OrderStatus::Failed,
        other => return Err(OrderStoreError::UnknownStatus(other.to_string())),
    })
}

pub fn order_type_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Retrieve => "retrieve",
        OrderType::Move => "move",
        OrderType::Store => "store",
    }
}

fn parse_order_type(raw: &str) -> Result<OrderType, OrderStoreError> {
    Ok(match raw {
        "retrieve" => OrderType::Retrieve,
        "move" => OrderType::Move,
        "store" => OrderType::Store,
        other => return Err(OrderStoreError::UnknownType(other.to_string())),
    })
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, new_order: NewOrder, status: OrderStatus) -> Result<Order, OrderStoreError>;
    async fn get(&self, id: i64) -> Result<Option<Order>, OrderStoreError>;
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Order>, OrderStoreError>;
    async fn update_status(&self, id: i64, status: OrderStatus, detail: Option<&str>) -> Result<(), OrderStoreError>;
    async fn set_waybill_eta(
        &self,
        id: i64,
        waybill_id: Option<&str>,
        eta: Option<DateTime<Utc>>,
    ) -> Result<(), OrderStoreError>;
    async fn set_delivery_node(&self, id: i64, delivery_node: &str) -> Result<(), OrderStoreError>;
    async fn set_count_confirmed(&self, id: i64) -> Result<(), OrderStoreError>;
    async fn confirm_delivery(&self, id: i64, final_count: f64) -> Result<(), OrderStoreError>;
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, new_order: NewOrder, status: OrderStatus) -> Result<Order, OrderStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders
                (uuid, order_type, status, payload_id, retrieve_empty, quantity,
                 delivery_node, pickup_node, staging_node, load_type, description,
                 auto_confirm, count_confirmed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now(), now())
            RETURNING id, uuid, order_type, status, payload_id, retrieve_empty, quantity,
                      delivery_node, pickup_node, staging_node, load_type, description,
                      waybill_id, eta, final_count, count_confirmed, auto_confirm,
                      created_at, updated_at
            "#,
        )
        .bind(new_order.uuid)
        .bind(order_type_str(new_order.order_type))
        .bind(status_str(status))
        .bind(new_order.payload_id)
        .bind(new_order.retrieve_empty)
        .bind(new_order.quantity)
        .bind(&new_order.delivery_node)
        .bind(&new_order.pickup_node)
        .bind(&new_order.staging_node)
        .bind(&new_order.load_type)
        .bind(&new_order.description)
        .bind(new_order.auto_confirm)
        .bind(new_order.count_confirmed)
        .fetch_one(&self.pool)
        .await?;

        row_to_order(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, uuid, order_type, status, payload_id, retrieve_empty, quantity,
                   delivery_node, pickup_node, staging_node, load_type, description,
                   waybill_id, eta, final_count, count_confirmed, auto_confirm,
                   created_at, updated_at
            FROM orders WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, uuid, order_type, status, payload_id, retrieve_empty, quantity,
                   delivery_node, pickup_node, staging_node, load_type, description,
                   waybill_id, eta, final_count, count_confirmed, auto_confirm,
                   created_at, updated_at
            FROM orders WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn update_status(&self, id: i64, status: OrderStatus, detail: Option<&str>) -> Result<(), OrderStoreError> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO order_history (order_id, status, detail, recorded_at) VALUES ($1, $2, $3, now())",
        )
        .bind(id)
        .bind(status_str(status))
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_waybill_eta(
        &self,
        id: i64,
        waybill_id: Option<&str>,
        eta: Option<DateTime<Utc>>,
    ) -> Result<(), OrderStoreError> {
        sqlx::query("UPDATE orders SET waybill_id = COALESCE($2, waybill_id), eta = $3, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(waybill_id)
            .bind(eta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_delivery_node(&self, id: i64, delivery_node: &str) -> Result<(), OrderStoreError> {
        sqlx::query("UPDATE orders SET delivery_node = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(delivery_node)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_count_confirmed(&self, id: i64) -> Result<(), OrderStoreError> {
        sqlx::query("UPDATE orders SET count_confirmed = true, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn confirm_delivery(&self, id: i64, final_count: f64) -> Result<(), OrderStoreError> {
        sqlx::query(
            "UPDATE orders SET final_count = $2, count_confirmed = true, status = 'confirmed', updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(final_count)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "INSERT INTO order_history (order_id, status, detail, recorded_at) VALUES ($1, 'confirmed', 'delivery confirmed', now())",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_order(row: sqlx::postgres::PgRow) -> Result<Order, OrderStoreError> {
    let order_type_raw: String = row.try_get("order_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        order_type: parse_order_type(&order_type_raw)?,
        status: parse_status(&status_raw)?,
        payload_id: row.try_get("payload_id")?,
        retrieve_empty: row.try_get("retrieve_empty")?,
        quantity: row.try_get("quantity")?,
        delivery_node: row.try_get("delivery_node")?,
        pickup_node: row.try_get("pickup_node")?,
        staging_node: row.try_get("staging_node")?,
        load_type: row.try_get("load_type")?,
        description: row.try_get("description")?,
        waybill_id: row.try_get("waybill_id")?,
        eta: row.try_get("eta")?,
        final_count: row.try_get("final_count")?,
        count_confirmed: row.try_get("count_confirmed")?,
        auto_confirm: row.try_get("auto_confirm")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
