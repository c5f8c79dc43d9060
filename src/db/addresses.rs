use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::money::Currency;

#[derive(Debug, Serialize, FromRow)]
pub struct UserAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub address: String,
    #[serde(skip_serializing)]
    pub private_key_encrypted: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct AddressRepository {
    pool: PgPool,
}

impl AddressRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<UserAddress>, sqlx::Error> {
        sqlx::query_as::<_, UserAddress>(
            "SELECT * FROM user_addresses WHERE user_id = $1 AND currency = $2 AND is_active",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn active_for_user(&self, user_id: Uuid) -> Result<Vec<UserAddress>, sqlx::Error> {
        sqlx::query_as::<_, UserAddress>(
            "SELECT * FROM user_addresses WHERE user_id = $1 AND is_active ORDER BY currency",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Every active dedicated address, for the observer scan.
    pub async fn all_active(&self) -> Result<Vec<UserAddress>, sqlx::Error> {
        sqlx::query_as::<_, UserAddress>("SELECT * FROM user_addresses WHERE is_active")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn upsert(
        &self,
        user_id: Uuid,
        currency: Currency,
        address: &str,
        private_key_encrypted: &str,
    ) -> Result<UserAddress, sqlx::Error> {
        sqlx::query_as::<_, UserAddress>(
            r#"
            INSERT INTO user_addresses (user_id, currency, address, private_key_encrypted)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, currency) DO UPDATE
                SET address = EXCLUDED.address,
                    private_key_encrypted = EXCLUDED.private_key_encrypted,
                    is_active = TRUE,
                    updated_at = now()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(address)
        .bind(private_key_encrypted)
        .fetch_one(&self.pool)
        .await
    }
}
