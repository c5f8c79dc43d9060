use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::addresses::AddressRepository;
use crate::db::auth::AuthRepository;
use crate::db::wallets::WalletRepository;
use crate::db::withdrawals::{WithdrawalFee, WithdrawalRepository, WithdrawalRequest};
use crate::error::{ApiError, ApiResult};
use crate::money::{self, Currency};
use crate::state::AppState;

use super::utils::{validate_auth_token, validate_destination_address};

#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub amount_eur: Decimal,
    pub currency: Currency,
    pub destination_address: String,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub withdrawal_id: Uuid,
    pub fee_eur: Decimal,
    pub net_amount_eur: Decimal,
    pub estimated_crypto_amount: Decimal,
}

/// Total fee and net payout for a withdrawal amount.
pub(crate) fn compute_fee(amount_eur: Decimal, fee: &WithdrawalFee) -> (Decimal, Decimal) {
    let total_fee = fee.base_fee_eur + amount_eur * fee.percentage_fee;
    (total_fee, amount_eur - total_fee)
}

/// Start of the current UTC day and month, the cumulative-limit windows.
pub(crate) fn limit_window_starts(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let day_start = today.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let month_start = today
        .with_day(1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    (day_start, month_start)
}

/// Submit a withdrawal. Validation runs strictly before any external call;
/// the actual signing and broadcast happens in a background task, and the
/// balance is only debited once the broadcast succeeds.
async fn create_withdrawal(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<CreateWithdrawalRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    tracing::info!(
        "processing withdrawal: {} EUR in {} to {}",
        payload.amount_eur,
        payload.currency,
        payload.destination_address
    );

    validate_destination_address(payload.currency, &payload.destination_address)?;

    let withdrawals = WithdrawalRepository::new(state.pool.clone());
    let fee = withdrawals
        .fee_for(payload.currency)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("no fee schedule for {}", payload.currency)))?;

    if payload.amount_eur < fee.min_amount_eur {
        return Err(ApiError::Validation(format!(
            "Minimum withdrawal amount is {} EUR",
            fee.min_amount_eur
        )));
    }

    let (total_fee, net_amount) = compute_fee(payload.amount_eur, &fee);
    if net_amount <= Decimal::ZERO {
        return Err(ApiError::Validation("Amount too small after fees".into()));
    }

    // Cumulative limits over the current UTC day and month.
    let user = AuthRepository::new(state.pool.clone())
        .find_user(user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    let (day_start, month_start) = limit_window_starts(Utc::now());
    let withdrawn_today = withdrawals.withdrawn_since(user_id, day_start).await?;
    if withdrawn_today + payload.amount_eur > user.daily_withdrawal_limit_eur {
        return Err(ApiError::Validation("Withdrawal exceeds daily limit".into()));
    }
    let withdrawn_this_month = withdrawals.withdrawn_since(user_id, month_start).await?;
    if withdrawn_this_month + payload.amount_eur > user.monthly_withdrawal_limit_eur {
        return Err(ApiError::Validation("Withdrawal exceeds monthly limit".into()));
    }

    let rate = state.rates.fetch().await.rate_for(payload.currency);
    let crypto_amount = money::eur_to_crypto(net_amount, rate)
        .ok_or_else(|| ApiError::External("price feed returned unusable rate".into()))?;

    let wallet = WalletRepository::new(state.pool.clone()).get(user_id).await?;
    if wallet.coin_balance(payload.currency) < crypto_amount {
        return Err(ApiError::InsufficientFunds("Insufficient balance".into()));
    }

    let request = withdrawals
        .create(
            user_id,
            payload.amount_eur,
            crypto_amount,
            payload.currency,
            &payload.destination_address,
            total_fee,
        )
        .await?;

    let response = WithdrawalResponse {
        withdrawal_id: request.id,
        fee_eur: total_fee,
        net_amount_eur: net_amount,
        estimated_crypto_amount: crypto_amount,
    };

    // Fire-and-forget broadcast; failures land in the request's notes.
    tokio::spawn(broadcast_withdrawal(state.clone(), request));

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Background phase: claim the request, hand it to the signing/broadcast API,
/// and debit the balance only after the send succeeds.
async fn broadcast_withdrawal(state: AppState, request: WithdrawalRequest) {
    let withdrawals = WithdrawalRepository::new(state.pool.clone());

    match withdrawals.claim_for_processing(request.id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("withdrawal {} already claimed, skipping", request.id);
            return;
        }
        Err(err) => {
            tracing::error!("failed to claim withdrawal {}: {err}", request.id);
            return;
        }
    }

    match attempt_broadcast(&state, &request).await {
        Ok(tx_hash) => {
            if let Err(err) = withdrawals.mark_completed(request.id, &tx_hash).await {
                tracing::error!("failed to complete withdrawal {}: {err}", request.id);
                return;
            }
            if let Err(err) = WalletRepository::new(state.pool.clone())
                .debit(request.user_id, request.currency, request.amount_crypto)
                .await
            {
                tracing::error!("failed to debit balance for withdrawal {}: {err}", request.id);
                return;
            }
            tracing::info!("withdrawal {} completed with tx {tx_hash}", request.id);
        }
        Err(err) => {
            tracing::warn!("withdrawal {} failed: {err}", request.id);
            if let Err(db_err) = withdrawals.mark_failed(request.id, &err.to_string()).await {
                tracing::error!("failed to record withdrawal failure {}: {db_err}", request.id);
            }
        }
    }
}

async fn attempt_broadcast(state: &AppState, request: &WithdrawalRequest) -> ApiResult<String> {
    let address = AddressRepository::new(state.pool.clone())
        .active(request.user_id, request.currency)
        .await?
        .ok_or_else(|| ApiError::Validation("No active wallet found for user".into()))?;
    let private_key = address
        .private_key_encrypted
        .ok_or_else(|| ApiError::Validation("No active wallet found for user".into()))?;

    let amount_subunits = money::coin_to_subunits(request.amount_crypto);
    state
        .broadcast
        .send(
            request.currency,
            &address.address,
            &private_key,
            &request.destination_address,
            amount_subunits,
        )
        .await
}

pub fn withdrawal_routes(state: AppState) -> Router {
    Router::new()
        .route("/wallet/withdrawals", post(create_withdrawal))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn fee_schedule() -> WithdrawalFee {
        WithdrawalFee {
            currency: Currency::Btc,
            min_amount_eur: dec("20"),
            base_fee_eur: dec("2"),
            percentage_fee: dec("0.01"),
            network_fee_crypto: dec("0.00005"),
        }
    }

    #[test]
    fn fee_is_base_plus_percentage() {
        let (total_fee, net) = compute_fee(dec("100"), &fee_schedule());
        assert_eq!(total_fee, dec("3.00"));
        assert_eq!(net, dec("97.00"));
    }

    #[test]
    fn tiny_amounts_net_out_negative() {
        // below base fee: net must not be accepted
        let (_, net) = compute_fee(dec("1"), &fee_schedule());
        assert!(net <= Decimal::ZERO);
    }

    #[test]
    fn limit_windows_start_at_utc_midnight_and_month_start() {
        let now = Utc.with_ymd_and_hms(2025, 3, 17, 15, 42, 7).unwrap();
        let (day_start, month_start) = limit_window_starts(now);
        assert_eq!(day_start, Utc.with_ymd_and_hms(2025, 3, 17, 0, 0, 0).unwrap());
        assert_eq!(month_start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn first_of_month_windows_coincide() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 1).unwrap();
        let (day_start, month_start) = limit_window_starts(now);
        assert_eq!(day_start, month_start);
    }
}
