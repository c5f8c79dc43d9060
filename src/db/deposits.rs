use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::money::{self, Currency};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "deposit_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Received,
    Confirmed,
    Expired,
    Closed,
}

#[derive(Debug, Serialize, FromRow)]
pub struct DepositRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub address: String,
    pub requested_eur: Decimal,
    pub rate_locked: Decimal,
    /// Rate-locked coin amount including the fingerprint offset. Immutable
    /// once set; the exact amount the user is asked to send.
    pub crypto_amount: Decimal,
    pub fingerprint: i32,
    pub status: DepositStatus,
    pub confirmations: i32,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewDepositRequest {
    pub user_id: Uuid,
    pub currency: Currency,
    pub address: String,
    pub requested_eur: Decimal,
    pub rate_locked: Decimal,
    pub crypto_amount: Decimal,
    pub fingerprint: i32,
    pub expires_at: DateTime<Utc>,
}

/// Lock the oldest open request matching the observed amount within tolerance.
/// Must run inside a transaction; the returned row stays locked until commit,
/// so two concurrent scans cannot claim the same request.
pub async fn lock_candidate(
    conn: &mut PgConnection,
    currency: Currency,
    user_scope: Option<Uuid>,
    observed_amount: Decimal,
) -> Result<Option<DepositRequest>, sqlx::Error> {
    let min = observed_amount - money::tolerance();
    let max = observed_amount + money::tolerance();

    let mut builder = sqlx::QueryBuilder::new(
        "SELECT * FROM deposit_requests WHERE status = 'pending' AND expires_at > now() AND currency = ",
    );
    builder.push_bind(currency);
    builder.push(" AND crypto_amount BETWEEN ");
    builder.push_bind(min);
    builder.push(" AND ");
    builder.push_bind(max);
    if let Some(user_id) = user_scope {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id);
    }
    builder.push(" ORDER BY created_at ASC LIMIT 1 FOR UPDATE");

    builder
        .build_query_as::<DepositRequest>()
        .fetch_optional(&mut *conn)
        .await
}

/// Stamp a claimed request with the chain transaction and its new status.
pub async fn mark_matched(
    conn: &mut PgConnection,
    request_id: Uuid,
    status: DepositStatus,
    tx_hash: &str,
    confirmations: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE deposit_requests SET status = $2, tx_hash = $3, confirmations = $4 WHERE id = $1",
    )
    .bind(request_id)
    .bind(status)
    .bind(tx_hash)
    .bind(confirmations)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Advance a received request to confirmed once its transaction is buried.
/// Guarded on the current status: the first scan to see a confirmation wins,
/// later scans see zero rows and skip the credit.
pub async fn confirm_received(
    conn: &mut PgConnection,
    request_id: Uuid,
    confirmations: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deposit_requests SET status = 'confirmed', confirmations = $2 WHERE id = $1 AND status = 'received'",
    )
    .bind(request_id)
    .bind(confirmations)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub struct DepositRepository {
    pool: PgPool,
}

impl DepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_pending(&self, user_id: Uuid) -> Result<Option<DepositRequest>, sqlx::Error> {
        sqlx::query_as::<_, DepositRequest>(
            "SELECT * FROM deposit_requests WHERE user_id = $1 AND status = 'pending' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn create(&self, request: &NewDepositRequest) -> Result<DepositRequest, sqlx::Error> {
        sqlx::query_as::<_, DepositRequest>(
            r#"
            INSERT INTO deposit_requests
                (user_id, currency, address, requested_eur, rate_locked, crypto_amount,
                 fingerprint, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(request.currency)
        .bind(&request.address)
        .bind(request.requested_eur)
        .bind(request.rate_locked)
        .bind(request.crypto_amount)
        .bind(request.fingerprint)
        .bind(request.expires_at)
        .fetch_one(&self.pool)
        .await
    }

    /// User-initiated close. Only a still-pending request transitions; the
    /// returned flag reports whether this call won the race.
    pub async fn close(&self, request_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE deposit_requests SET status = 'closed' WHERE id = $1 AND user_id = $2 AND status = 'pending'",
        )
        .bind(request_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Batched sweep of overdue pending requests. Idempotent.
    pub async fn expire_overdue(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE deposit_requests SET status = 'expired' WHERE status = 'pending' AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<DepositRequest>, sqlx::Error> {
        sqlx::query_as::<_, DepositRequest>(
            "SELECT * FROM deposit_requests WHERE tx_hash = $1 LIMIT 1",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
    }
}
