use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::money::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Deposit,
    Purchase,
    Sale,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Completed,
    Confirmed,
    Failed,
}

/// Append-only ledger row. Entries are never rewritten after insertion; the
/// single exception is the pending deposit entry whose status and confirmation
/// count advance when the chain transaction confirms.
#[derive(Debug, Serialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub entry_type: EntryType,
    pub direction: EntryDirection,
    pub amount_eur: Decimal,
    pub amount_crypto: Decimal,
    pub currency: Currency,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub from_username: Option<String>,
    pub related_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub entry_type: EntryType,
    pub direction: EntryDirection,
    pub amount_eur: Decimal,
    pub amount_crypto: Decimal,
    pub currency: Currency,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub from_username: Option<String>,
    pub related_order_id: Option<Uuid>,
}

pub async fn insert<'e>(
    exec: impl PgExecutor<'e>,
    entry: &NewLedgerEntry,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO transactions
            (user_id, entry_type, direction, amount_eur, amount_crypto, currency,
             tx_hash, confirmations, status, description, from_username, related_order_id,
             confirmed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                CASE WHEN $9 IN ('completed', 'confirmed') THEN now() ELSE NULL END)
        RETURNING id
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.entry_type)
    .bind(entry.direction)
    .bind(entry.amount_eur)
    .bind(entry.amount_crypto)
    .bind(entry.currency)
    .bind(&entry.tx_hash)
    .bind(entry.confirmations)
    .bind(entry.status)
    .bind(&entry.description)
    .bind(&entry.from_username)
    .bind(entry.related_order_id)
    .fetch_one(exec)
    .await
}

/// Advance the pending deposit entry for a chain transaction to completed.
/// Guarded on the current status so repeated scans cannot double-complete.
pub async fn complete_deposit_entry<'e>(
    exec: impl PgExecutor<'e>,
    tx_hash: &str,
    user_id: Uuid,
    confirmations: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'completed', confirmations = $3, confirmed_at = now()
        WHERE tx_hash = $1 AND user_id = $2 AND entry_type = 'deposit' AND status = 'pending'
        "#,
    )
    .bind(tx_hash)
    .bind(user_id)
    .bind(confirmations)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether any ledger row references this chain transaction for the user.
    /// The idempotence guard for repeated observer ticks.
    pub async fn deposit_entry_exists(
        &self,
        tx_hash: &str,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE tx_hash = $1 AND user_id = $2 AND entry_type = 'deposit'
            )
            "#,
        )
        .bind(tx_hash)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM transactions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
