use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Serialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub price_eur: Decimal,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Load a product and lock its row for the duration of the order transaction,
/// so concurrent orders serialize on the stock check.
pub async fn product_for_update(
    conn: &mut PgConnection,
    product_id: Uuid,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn insert_order(
    conn: &mut PgConnection,
    buyer_id: Uuid,
    total_amount_eur: Decimal,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO orders (buyer_id, total_amount_eur) VALUES ($1, $2) RETURNING id",
    )
    .bind(buyer_id)
    .bind(total_amount_eur)
    .fetch_one(&mut *conn)
    .await
}

pub async fn insert_order_item(
    conn: &mut PgConnection,
    order_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    price_eur: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO order_items (order_id, product_id, quantity, price_eur) VALUES ($1, $2, $3, $4)",
    )
    .bind(order_id)
    .bind(product_id)
    .bind(quantity)
    .bind(price_eur)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Decrement stock, floored at zero.
pub async fn decrement_stock(
    conn: &mut PgConnection,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE products SET stock = GREATEST(stock - $2, 0), updated_at = now() WHERE id = $1",
    )
    .bind(product_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn confirm_order(conn: &mut PgConnection, order_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET status = 'confirmed', updated_at = now() WHERE id = $1")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn username_of<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(exec)
        .await
}
