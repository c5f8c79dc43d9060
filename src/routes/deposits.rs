use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::addresses::AddressRepository;
use crate::db::deposits::{DepositRepository, DepositRequest, NewDepositRequest};
use crate::error::{ApiError, ApiResult};
use crate::money::{self, Currency};
use crate::state::AppState;

use super::utils::validate_auth_token;

/// Requests stay open for six hours before the expiry sweep closes them.
const REQUEST_TTL_HOURS: i64 = 6;

#[derive(Debug, Deserialize)]
pub struct CreateDepositRequest {
    pub amount_eur: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub id: Uuid,
    pub currency: Currency,
    pub address: String,
    pub requested_eur: Decimal,
    /// Exact coin amount the user must send, fingerprint included.
    pub crypto_amount: String,
    pub rate_locked: Decimal,
    pub fingerprint: i32,
    pub expires_at: DateTime<Utc>,
    pub payment_uri: String,
}

impl DepositResponse {
    fn from_request(request: DepositRequest) -> Self {
        let payment_uri = format!(
            "{}:{}?amount={}",
            request.currency.uri_scheme(),
            request.address,
            request.crypto_amount
        );
        Self {
            id: request.id,
            currency: request.currency,
            address: request.address,
            requested_eur: request.requested_eur,
            crypto_amount: request.crypto_amount.to_string(),
            rate_locked: request.rate_locked,
            fingerprint: request.fingerprint,
            expires_at: request.expires_at,
            payment_uri,
        }
    }
}

/// Open a deposit request: lock the current rate, fingerprint the amount, and
/// hand back the exact total to send. One open request per user at a time.
async fn create_deposit(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<CreateDepositRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    if payload.amount_eur <= Decimal::ZERO {
        return Err(ApiError::Validation("Amount must be greater than zero".into()));
    }

    let deposits = DepositRepository::new(state.pool.clone());
    if deposits.find_pending(user_id).await?.is_some() {
        return Err(ApiError::Conflict(
            "You already have a pending deposit request. Please complete or close it first.".into(),
        ));
    }

    // Rate is locked now; later price movement does not change the amount owed.
    let rate = state.rates.fetch().await.rate_for(payload.currency);
    let base_amount = money::eur_to_crypto(payload.amount_eur, rate)
        .ok_or_else(|| ApiError::External("price feed returned unusable rate".into()))?;

    let fingerprint = money::random_fingerprint();
    let final_amount = base_amount + money::fingerprint_offset(fingerprint);

    // Prefer the user's dedicated address; fall back to the shared pool, where
    // the fingerprint disambiguates concurrent requests.
    let address_repo = AddressRepository::new(state.pool.clone());
    let address = match address_repo.active(user_id, payload.currency).await? {
        Some(entry) => entry.address,
        None => state
            .shared_address(payload.currency)
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::External(format!(
                    "No shared address configured for {}",
                    payload.currency
                ))
            })?,
    };

    // The unique index on pending requests backs up the check above; a
    // concurrent create losing the race surfaces as a conflict, not a 500.
    let request = deposits
        .create(&NewDepositRequest {
            user_id,
            currency: payload.currency,
            address,
            requested_eur: payload.amount_eur,
            rate_locked: rate,
            crypto_amount: final_amount,
            fingerprint,
            expires_at: Utc::now() + Duration::hours(REQUEST_TTL_HOURS),
        })
        .await
        .map_err(|err| {
            if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                ApiError::Conflict(
                    "You already have a pending deposit request. Please complete or close it first."
                        .into(),
                )
            } else {
                err.into()
            }
        })?;

    tracing::info!(
        "created deposit request {} for user {user_id}: {} {} expiring {}",
        request.id,
        request.crypto_amount,
        request.currency,
        request.expires_at
    );

    Ok((StatusCode::CREATED, Json(DepositResponse::from_request(request))))
}

/// Close a still-pending request. Losing the race to the matcher or the
/// expiry sweep reports as a conflict rather than silently succeeding.
async fn close_deposit(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    let deposits = DepositRepository::new(state.pool.clone());
    if deposits.close(request_id, user_id).await? {
        tracing::info!("user {user_id} closed deposit request {request_id}");
        Ok((StatusCode::OK, Json(serde_json::json!({ "closed": true }))))
    } else {
        Err(ApiError::Conflict("Deposit request is no longer pending".into()))
    }
}

async fn pending_deposit(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    let deposits = DepositRepository::new(state.pool.clone());
    match deposits.find_pending(user_id).await? {
        Some(request) => Ok((StatusCode::OK, Json(DepositResponse::from_request(request)))),
        None => Err(ApiError::NotFound("No pending deposit request".into())),
    }
}

pub fn deposit_routes(state: AppState) -> Router {
    Router::new()
        .route("/wallet/deposits", post(create_deposit))
        .route("/wallet/deposits/pending", get(pending_deposit))
        .route("/wallet/deposits/:id/close", post(close_deposit))
        .with_state(state)
}
