use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::money::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, FromRow)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_eur: Decimal,
    pub amount_crypto: Decimal,
    pub currency: Currency,
    pub destination_address: String,
    pub fee_eur: Decimal,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
pub struct WithdrawalFee {
    pub currency: Currency,
    pub min_amount_eur: Decimal,
    pub base_fee_eur: Decimal,
    pub percentage_fee: Decimal,
    pub network_fee_crypto: Decimal,
}

pub struct WithdrawalRepository {
    pool: PgPool,
}

impl WithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fee_for(&self, currency: Currency) -> Result<Option<WithdrawalFee>, sqlx::Error> {
        sqlx::query_as::<_, WithdrawalFee>(
            r#"
            SELECT currency, min_amount_eur, base_fee_eur, percentage_fee, network_fee_crypto
            FROM withdrawal_fees WHERE currency = $1
            "#,
        )
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
    }

    /// Cumulative EUR withdrawn (or in flight) since `since`. Failed requests
    /// do not count against the limit.
    pub async fn withdrawn_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, sqlx::Error> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount_eur), 0)
            FROM withdrawal_requests
            WHERE user_id = $1 AND created_at >= $2 AND status <> 'failed'
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        amount_eur: Decimal,
        amount_crypto: Decimal,
        currency: Currency,
        destination_address: &str,
        fee_eur: Decimal,
    ) -> Result<WithdrawalRequest, sqlx::Error> {
        sqlx::query_as::<_, WithdrawalRequest>(
            r#"
            INSERT INTO withdrawal_requests
                (user_id, amount_eur, amount_crypto, currency, destination_address, fee_eur)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(amount_eur)
        .bind(amount_crypto)
        .bind(currency)
        .bind(destination_address)
        .bind(fee_eur)
        .fetch_one(&self.pool)
        .await
    }

    /// Claim a pending request for broadcast. At-least-once safe: only one
    /// worker wins the pending -> processing transition.
    pub async fn claim_for_processing(&self, request_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE withdrawal_requests SET status = 'processing', updated_at = now() WHERE id = $1 AND status = 'pending'",
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_completed(&self, request_id: Uuid, tx_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE withdrawal_requests
            SET status = 'completed', tx_hash = $2, processed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(request_id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, request_id: Uuid, notes: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE withdrawal_requests SET status = 'failed', notes = $2, updated_at = now() WHERE id = $1",
        )
        .bind(request_id)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
