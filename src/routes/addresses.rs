use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::addresses::{AddressRepository, UserAddress};
use crate::error::{ApiError, ApiResult};
use crate::money::Currency;
use crate::state::AppState;

use super::utils::validate_auth_token;

#[derive(Debug, Serialize)]
pub struct ProvisionedAddresses {
    pub generated: Vec<UserAddress>,
    pub existing: Vec<UserAddress>,
}

/// Provision dedicated deposit addresses for the caller. Idempotent: coins
/// that already have an active address are left untouched and reported back.
async fn generate_addresses(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    let repo = AddressRepository::new(state.pool.clone());
    let mut generated = Vec::new();
    let mut existing = Vec::new();

    for currency in [Currency::Btc, Currency::Ltc] {
        if let Some(address) = repo.active(user_id, currency).await? {
            existing.push(address);
            continue;
        }
        let fresh = state.blockcypher.generate_address(currency).await?;
        let stored = repo
            .upsert(user_id, currency, &fresh.address, &fresh.private)
            .await?;
        tracing::info!("generated {currency} address {} for user {user_id}", stored.address);
        generated.push(stored);
    }

    let status = if generated.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ProvisionedAddresses { generated, existing })))
}

async fn list_addresses(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    let addresses = AddressRepository::new(state.pool.clone())
        .active_for_user(user_id)
        .await?;
    Ok((StatusCode::OK, Json(addresses)))
}

/// The pooled fallback address for a coin, for clients that have not
/// provisioned a dedicated address.
async fn shared_address(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> ApiResult<impl IntoResponse> {
    validate_auth_token(&headers, &state.auth)?;

    let currency = Currency::parse(&currency)
        .ok_or_else(|| ApiError::Validation(format!("Unknown currency: {currency}")))?;
    let address = state
        .shared_address(currency)
        .ok_or_else(|| ApiError::External(format!("No shared address configured for {currency}")))?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "currency": currency, "address": address })),
    ))
}

pub fn address_routes(state: AppState) -> Router {
    Router::new()
        .route("/wallet/addresses", post(generate_addresses).get(list_addresses))
        .route("/wallet/addresses/shared/:currency", get(shared_address))
        .with_state(state)
}
