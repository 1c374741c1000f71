//! Postgres-backed store.
//!
//! Row locks come from `SELECT ... FOR UPDATE`; the three stock counter
//! updates are single guarded statements, so the reservation invariant is
//! enforced by the database even if a caller's locking is imperfect.
//! Reference DDL lives in `schema.sql` next to this crate (schema
//! provisioning itself is a collaborator concern).
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | `StoreError` | Scenario |
//! |-----------------------|--------------|----------|
//! | `23505` | `Duplicate` | Unique constraint (idempotency_key, hold_id, token) |
//! | `40001`, `40P01` | `Serialization` | Serialization failure / deadlock; retried by the service layer |
//! | `55P03` | `Serialization` | Lock not available (NOWAIT/timeout variants) |
//! | other | `Backend` | Connection, protocol, constraint and data errors |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use surgecart_core::{HoldId, Money, OrderId, ProductId, WebhookEventId};
use surgecart_domain::{Hold, HoldStatus, Order, OrderStatus, Product, WebhookEvent, WebhookOutcome};

use super::{IngestOutcome, Store, StoreError, StoreTx};

/// Postgres implementation of [`Store`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresTx { tx })
    }
}

/// Transaction over [`PostgresStore`].
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

fn map_sqlx_error(op: &'static str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => {
                StoreError::Duplicate(db.constraint().unwrap_or("unique").to_string())
            }
            Some("40001") | Some("40P01") | Some("55P03") => {
                StoreError::Serialization(format!("{op}: {db}"))
            }
            _ => StoreError::Backend(format!("{op}: {db}")),
        },
        _ => StoreError::Backend(format!("{op}: {e}")),
    }
}

fn hold_status_from_str(s: &str) -> Result<HoldStatus, StoreError> {
    match s {
        "active" => Ok(HoldStatus::Active),
        "consumed" => Ok(HoldStatus::Consumed),
        "expired" => Ok(HoldStatus::Expired),
        other => Err(StoreError::backend(format!("unexpected hold status: {other}"))),
    }
}

fn order_status_from_str(s: &str) -> Result<OrderStatus, StoreError> {
    match s {
        "pending" => Ok(OrderStatus::Pending),
        "paid" => Ok(OrderStatus::Paid),
        "failed" => Ok(OrderStatus::Failed),
        "cancelled" => Ok(OrderStatus::Cancelled),
        other => Err(StoreError::backend(format!("unexpected order status: {other}"))),
    }
}

fn outcome_from_str(s: &str) -> Result<WebhookOutcome, StoreError> {
    match s {
        "applied" => Ok(WebhookOutcome::Applied),
        "failed" => Ok(WebhookOutcome::Failed),
        "waiting_for_order" => Ok(WebhookOutcome::WaitingForOrder),
        other => Err(StoreError::backend(format!("unexpected webhook outcome: {other}"))),
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::from_uuid(get(row, "id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        price: Money::from_minor(get(row, "price_minor")?),
        stock_total: get(row, "stock_total")?,
        stock_reserved: get(row, "stock_reserved")?,
        stock_sold: get(row, "stock_sold")?,
        created_at: get(row, "created_at")?,
    })
}

fn hold_from_row(row: &PgRow) -> Result<Hold, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Hold {
        id: HoldId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        qty: get(row, "qty")?,
        status: hold_status_from_str(&status)?,
        expires_at: get(row, "expires_at")?,
        used_at: get(row, "used_at")?,
        token: get(row, "token")?,
        created_at: get(row, "created_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Order {
        id: OrderId::from_uuid(get(row, "id")?),
        hold_id: HoldId::from_uuid(get(row, "hold_id")?),
        external_payment_id: get(row, "external_payment_id")?,
        status: order_status_from_str(&status)?,
        amount: Money::from_minor(get(row, "amount_minor")?),
        created_at: get(row, "created_at")?,
    })
}

fn webhook_from_row(row: &PgRow) -> Result<WebhookEvent, StoreError> {
    let outcome: Option<String> = get(row, "outcome")?;
    Ok(WebhookEvent {
        id: WebhookEventId::from_uuid(get(row, "id")?),
        idempotency_key: get(row, "idempotency_key")?,
        order_id: get::<Option<Uuid>>(row, "order_id")?.map(OrderId::from_uuid),
        event_type: get(row, "event_type")?,
        payload: get(row, "payload")?,
        processed: get(row, "processed")?,
        outcome: outcome.as_deref().map(outcome_from_str).transpose()?,
        processed_at: get(row, "processed_at")?,
        received_at: get(row, "received_at")?,
    })
}

fn get<'r, T>(row: &'r PgRow, column: &'static str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::backend(format!("column {column}: {e}")))
}

const PRODUCT_COLS: &str =
    "id, sku, name, price_minor, stock_total, stock_reserved, stock_sold, created_at";
const HOLD_COLS: &str = "id, product_id, qty, status, expires_at, used_at, token, created_at";
const ORDER_COLS: &str = "id, hold_id, external_payment_id, status, amount_minor, created_at";
const WEBHOOK_COLS: &str =
    "id, idempotency_key, order_id, event_type, payload, processed, outcome, processed_at, received_at";

#[async_trait]
impl StoreTx for PostgresTx {
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products \
             (id, sku, name, price_minor, stock_total, stock_reserved, stock_sold, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price.minor())
        .bind(product.stock_total)
        .bind(product.stock_reserved)
        .bind(product.stock_sold)
        .bind(product.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("product_for_update", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn try_reserve_stock(&mut self, id: ProductId, qty: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE products SET stock_reserved = stock_reserved + $2 \
             WHERE id = $1 AND stock_total - stock_reserved - stock_sold >= $2",
        )
        .bind(id.as_uuid())
        .bind(qty)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("try_reserve_stock", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_commit_stock(&mut self, id: ProductId, qty: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE products \
             SET stock_reserved = stock_reserved - $2, stock_sold = stock_sold + $2 \
             WHERE id = $1 AND stock_reserved >= $2",
        )
        .bind(id.as_uuid())
        .bind(qty)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("try_commit_stock", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_stock(
        &mut self,
        id: ProductId,
        qty: i64,
    ) -> Result<Option<i64>, StoreError> {
        // Lock the row to read the pre-image, then apply the clamped
        // decrement; both statements run inside this transaction.
        let row = sqlx::query("SELECT stock_reserved FROM products WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("release_stock", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let reserved: i64 = get(&row, "stock_reserved")?;
        let released = qty.min(reserved).max(0);
        sqlx::query(
            "UPDATE products SET stock_reserved = GREATEST(stock_reserved - $2, 0) WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(qty)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("release_stock", e))?;
        Ok(Some(released))
    }

    async fn insert_hold(&mut self, hold: &Hold) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO holds \
             (id, product_id, qty, status, expires_at, used_at, token, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(hold.id.as_uuid())
        .bind(hold.product_id.as_uuid())
        .bind(hold.qty)
        .bind(hold.status.as_str())
        .bind(hold.expires_at)
        .bind(hold.used_at)
        .bind(&hold.token)
        .bind(hold.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_hold", e))?;
        Ok(())
    }

    async fn hold(&mut self, id: HoldId) -> Result<Option<Hold>, StoreError> {
        let row = sqlx::query(&format!("SELECT {HOLD_COLS} FROM holds WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("hold", e))?;
        row.as_ref().map(hold_from_row).transpose()
    }

    async fn hold_for_update(&mut self, id: HoldId) -> Result<Option<Hold>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {HOLD_COLS} FROM holds WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("hold_for_update", e))?;
        row.as_ref().map(hold_from_row).transpose()
    }

    async fn update_hold(&mut self, hold: &Hold) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE holds SET status = $2, expires_at = $3, used_at = $4 WHERE id = $1",
        )
        .bind(hold.id.as_uuid())
        .bind(hold.status.as_str())
        .bind(hold.expires_at)
        .bind(hold.used_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_hold", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing("holds"));
        }
        Ok(())
    }

    async fn due_hold_ids(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HoldId>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM holds \
             WHERE status = 'active' AND expires_at <= $1 \
             ORDER BY expires_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("due_hold_ids", e))?;
        rows.iter()
            .map(|row| Ok(HoldId::from_uuid(get(row, "id")?)))
            .collect()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders \
             (id, hold_id, external_payment_id, status, amount_minor, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(order.id.as_uuid())
        .bind(order.hold_id.as_uuid())
        .bind(&order.external_payment_id)
        .bind(order.status.as_str())
        .bind(order.amount.minor())
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("order", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("order_for_update", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_hold(&mut self, hold_id: HoldId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLS} FROM orders WHERE hold_id = $1"))
            .bind(hold_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("order_by_hold", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, external_payment_id = $3 WHERE id = $1",
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(&order.external_payment_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_order", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing("orders"));
        }
        Ok(())
    }

    async fn insert_webhook_event(
        &mut self,
        event: &WebhookEvent,
    ) -> Result<IngestOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO webhook_events \
             (id, idempotency_key, order_id, event_type, payload, processed, outcome, \
              processed_at, received_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(event.id.as_uuid())
        .bind(&event.idempotency_key)
        .bind(event.order_id.map(|id| *id.as_uuid()))
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.processed)
        .bind(event.outcome.map(|o| o.as_str()))
        .bind(event.processed_at)
        .bind(event.received_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_webhook_event", e))?;

        if result.rows_affected() == 1 {
            return Ok(IngestOutcome::Created);
        }
        let row = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLS} FROM webhook_events WHERE idempotency_key = $1"
        ))
        .bind(&event.idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_webhook_event", e))?;
        let existing = row
            .as_ref()
            .map(webhook_from_row)
            .transpose()?
            .ok_or(StoreError::Missing("webhook_events"))?;
        Ok(IngestOutcome::Existing(existing))
    }

    async fn webhook_event(
        &mut self,
        id: WebhookEventId,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLS} FROM webhook_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("webhook_event", e))?;
        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn webhook_event_for_update(
        &mut self,
        id: WebhookEventId,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLS} FROM webhook_events WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("webhook_event_for_update", e))?;
        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn update_webhook_event(&mut self, event: &WebhookEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_events \
             SET order_id = $2, processed = $3, outcome = $4, processed_at = $5 \
             WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(event.order_id.map(|id| *id.as_uuid()))
        .bind(event.processed)
        .bind(event.outcome.map(|o| o.as_str()))
        .bind(event.processed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_webhook_event", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing("webhook_events"));
        }
        Ok(())
    }

    async fn waiting_webhook_ids(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WebhookEventId>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM webhook_events \
             WHERE processed = FALSE AND outcome = 'waiting_for_order' \
             ORDER BY received_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("waiting_webhook_ids", e))?;
        rows.iter()
            .map(|row| Ok(WebhookEventId::from_uuid(get(row, "id")?)))
            .collect()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}
