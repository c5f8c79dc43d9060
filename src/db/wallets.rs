use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::money::Currency;

#[derive(Debug, Serialize, FromRow)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub balance_eur: Decimal,
    pub balance_btc: Decimal,
    pub balance_ltc: Decimal,
    pub balance_btc_deposited: Decimal,
    pub balance_ltc_deposited: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletBalance {
    pub fn coin_balance(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Btc => self.balance_btc,
            Currency::Ltc => self.balance_ltc,
        }
    }
}

/// Additive change to one user's balance row. Every mutation of
/// `wallet_balances` is expressed as a delta and applied as an atomic
/// `SET x = x + $n` increment, so concurrent invocations cannot lose updates.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BalanceDelta {
    pub eur: Decimal,
    pub btc: Decimal,
    pub ltc: Decimal,
    pub btc_deposited: Decimal,
    pub ltc_deposited: Decimal,
}

impl BalanceDelta {
    /// Credit for a confirmed deposit: the rate-locked EUR amount plus the
    /// observed coin amount. Dedicated-address deposits also bump the
    /// lifetime-deposited counter.
    pub fn deposit_credit(
        currency: Currency,
        amount_eur: Decimal,
        amount_crypto: Decimal,
        dedicated_address: bool,
    ) -> Self {
        let mut delta = Self {
            eur: amount_eur,
            ..Self::default()
        };
        match currency {
            Currency::Btc => {
                delta.btc = amount_crypto;
                if dedicated_address {
                    delta.btc_deposited = amount_crypto;
                }
            }
            Currency::Ltc => {
                delta.ltc = amount_crypto;
                if dedicated_address {
                    delta.ltc_deposited = amount_crypto;
                }
            }
        }
        delta
    }

    /// Debit of a coin balance (purchase or completed withdrawal).
    pub fn coin_debit(currency: Currency, amount_crypto: Decimal) -> Self {
        let mut delta = Self::default();
        match currency {
            Currency::Btc => delta.btc = -amount_crypto,
            Currency::Ltc => delta.ltc = -amount_crypto,
        }
        delta
    }

    /// Credit of a coin balance (sale proceeds).
    pub fn coin_credit(currency: Currency, amount_crypto: Decimal) -> Self {
        let mut delta = Self::default();
        match currency {
            Currency::Btc => delta.btc = amount_crypto,
            Currency::Ltc => delta.ltc = amount_crypto,
        }
        delta
    }
}

/// Create the balance row lazily with zero balances.
pub async fn ensure<'e>(exec: impl PgExecutor<'e>, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO wallet_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Apply a delta as a single atomic increment statement.
pub async fn apply<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    delta: &BalanceDelta,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE wallet_balances SET
            balance_eur = balance_eur + $2,
            balance_btc = balance_btc + $3,
            balance_ltc = balance_ltc + $4,
            balance_btc_deposited = balance_btc_deposited + $5,
            balance_ltc_deposited = balance_ltc_deposited + $6,
            updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(delta.eur)
    .bind(delta.btc)
    .bind(delta.ltc)
    .bind(delta.btc_deposited)
    .bind(delta.ltc_deposited)
    .execute(exec)
    .await?;
    Ok(())
}

/// Lock a set of balance rows. Acquisition follows ascending user id no
/// matter how the caller ordered the ids, so transactions touching the same
/// wallets cannot deadlock on each other.
pub async fn lock_balances(
    conn: &mut sqlx::PgConnection,
    user_ids: &[Uuid],
) -> Result<Vec<WalletBalance>, sqlx::Error> {
    sqlx::query_as::<_, WalletBalance>(
        r#"
        SELECT user_id, balance_eur, balance_btc, balance_ltc,
               balance_btc_deposited, balance_ltc_deposited, created_at, updated_at
        FROM wallet_balances WHERE user_id = ANY($1)
        ORDER BY user_id FOR UPDATE
        "#,
    )
    .bind(user_ids)
    .fetch_all(&mut *conn)
    .await
}

pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<WalletBalance, sqlx::Error> {
        ensure(&self.pool, user_id).await?;
        sqlx::query_as::<_, WalletBalance>(
            r#"
            SELECT user_id, balance_eur, balance_btc, balance_ltc,
                   balance_btc_deposited, balance_ltc_deposited, created_at, updated_at
            FROM wallet_balances WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn credit(&self, user_id: Uuid, delta: &BalanceDelta) -> Result<(), sqlx::Error> {
        ensure(&self.pool, user_id).await?;
        apply(&self.pool, user_id, delta).await
    }

    pub async fn debit(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount_crypto: Decimal,
    ) -> Result<(), sqlx::Error> {
        ensure(&self.pool, user_id).await?;
        apply(&self.pool, user_id, &BalanceDelta::coin_debit(currency, amount_crypto)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn deposit_credit_uses_locked_eur_and_observed_crypto() {
        let delta = BalanceDelta::deposit_credit(Currency::Btc, dec("50"), dec("0.00055557"), false);
        assert_eq!(delta.eur, dec("50"));
        assert_eq!(delta.btc, dec("0.00055557"));
        assert_eq!(delta.ltc, Decimal::ZERO);
        assert_eq!(delta.btc_deposited, Decimal::ZERO);
    }

    #[test]
    fn dedicated_deposit_bumps_lifetime_counter() {
        let delta = BalanceDelta::deposit_credit(Currency::Ltc, dec("25"), dec("0.25000042"), true);
        assert_eq!(delta.ltc, dec("0.25000042"));
        assert_eq!(delta.ltc_deposited, dec("0.25000042"));
        assert_eq!(delta.btc, Decimal::ZERO);
    }

    #[test]
    fn coin_debit_is_negative_on_one_field_only() {
        let delta = BalanceDelta::coin_debit(Currency::Btc, dec("0.001"));
        assert_eq!(delta.btc, dec("-0.001"));
        assert_eq!(delta.eur, Decimal::ZERO);
        assert_eq!(delta.ltc, Decimal::ZERO);
    }

    #[test]
    fn debit_delta_cancels_an_equal_credit() {
        let debit = BalanceDelta::coin_debit(Currency::Ltc, dec("0.5"));
        let credit = BalanceDelta::coin_credit(Currency::Ltc, dec("0.5"));
        assert_eq!(debit.ltc + credit.ltc, Decimal::ZERO);
    }
}
