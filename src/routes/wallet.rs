use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{sse::Event, IntoResponse, Sse},
    routing::get,
    Json, Router,
};
use futures::StreamExt;

use crate::db::ledger::LedgerRepository;
use crate::db::wallets::WalletRepository;
use crate::error::ApiResult;
use crate::state::AppState;

use super::utils::validate_auth_token;

/// Balance summary. The row is created lazily on first access.
async fn get_wallet(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    let wallets = WalletRepository::new(state.pool.clone());
    let balance = wallets.get(user_id).await?;
    Ok((StatusCode::OK, Json(balance)))
}

// stream the user's full ledger, newest first
async fn list_transactions(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let user_id = validate_auth_token(&headers, &state.auth)?;

    let ledger = LedgerRepository::new(state.pool.clone());
    let entries = ledger.list_for_user(user_id).await?;

    let stream = futures::stream::iter(entries).map(|entry| Event::default().json_data(entry));

    let sse = Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(2))
            .text("keep-alive-text"),
    );

    Ok(sse)
}

pub fn wallet_routes(state: AppState) -> Router {
    Router::new()
        .route("/wallet", get(get_wallet))
        .route("/wallet/transactions", get(list_transactions))
        .with_state(state)
}
