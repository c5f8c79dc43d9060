use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::ledger::{self, EntryDirection, EntryStatus, EntryType, NewLedgerEntry};
use crate::db::orders::{
    confirm_order, decrement_stock, insert_order, insert_order_item, product_for_update,
    username_of, Product,
};
use crate::db::wallets::{self, BalanceDelta};
use crate::error::{ApiError, ApiResult};
use crate::money::{self, Currency};
use crate::state::AppState;

use super::utils::validate_auth_token;

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    pub currency: Currency,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub total_eur: Decimal,
    pub total_crypto: Decimal,
    pub currency: Currency,
    pub status: &'static str,
}

/// Quantity per product, summed across duplicate lines. The map is ordered by
/// product id, so every order transaction locks product rows in the same
/// order and the stock check sees the order's full demand for each product.
fn aggregate_quantities(items: &[OrderItemRequest]) -> BTreeMap<Uuid, i32> {
    let mut quantities: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in items {
        *quantities.entry(item.product_id).or_default() += item.quantity;
    }
    quantities
}

/// Wallet rows touched by the order (buyer plus every seller), ascending by
/// user id so concurrent orders acquire the row locks in one global order.
fn wallet_lock_order(buyer_id: Uuid, sellers: &BTreeMap<Uuid, Decimal>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = sellers.keys().copied().collect();
    if !sellers.contains_key(&buyer_id) {
        ids.push(buyer_id);
    }
    ids.sort();
    ids
}

/// EUR owed to each seller, keyed by seller id. Ordering is stable so the
/// resulting ledger entries come out in a deterministic order.
fn seller_totals(products: &BTreeMap<Uuid, Product>, quantities: &BTreeMap<Uuid, i32>) -> BTreeMap<Uuid, Decimal> {
    let mut totals: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for (product_id, product) in products {
        let quantity = quantities[product_id];
        *totals.entry(product.seller_id).or_default() +=
            product.price_eur * Decimal::from(quantity);
    }
    totals
}

/// Convert each seller's EUR share at the locked rate. The buyer is debited
/// the sum of the rounded shares, so credits and the debit always balance.
fn seller_crypto_shares(
    totals: &BTreeMap<Uuid, Decimal>,
    rate: Decimal,
) -> Option<(BTreeMap<Uuid, Decimal>, Decimal)> {
    let mut shares = BTreeMap::new();
    let mut total = Decimal::ZERO;
    for (&seller_id, &eur) in totals {
        let crypto = money::eur_to_crypto(eur, rate)?;
        total += crypto;
        shares.insert(seller_id, crypto);
    }
    Some((shares, total))
}

fn short_order_ref(order_id: Uuid) -> String {
    order_id.to_string()[..8].to_string()
}

/// Place an order paid from the buyer's coin balance. Stock checks, the funds
/// check, the buyer debit and every seller credit commit in one transaction;
/// a failure at any point leaves stock and balances untouched.
async fn create_order(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    let buyer_id = validate_auth_token(&headers, &state.auth)?;

    if payload.items.is_empty() {
        return Err(ApiError::Validation("Order must contain at least one item".into()));
    }
    if payload.items.iter().any(|item| item.quantity <= 0) {
        return Err(ApiError::Validation("Item quantity must be positive".into()));
    }

    let rate = state.rates.fetch().await.rate_for(payload.currency);
    let quantities = aggregate_quantities(&payload.items);

    let mut tx = state.pool.begin().await?;

    // Lock product rows in product-id order and check each product's stock
    // against the order's aggregate demand for it.
    let mut products: BTreeMap<Uuid, Product> = BTreeMap::new();
    for (&product_id, &quantity) in &quantities {
        let product = product_for_update(&mut tx, product_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Product not found".into()))?;
        if product.stock < quantity {
            return Err(ApiError::InsufficientStock(format!(
                "Insufficient stock for {}",
                product.title
            )));
        }
        products.insert(product_id, product);
    }

    let totals = seller_totals(&products, &quantities);
    let total_eur: Decimal = totals.values().copied().sum();
    let (shares, total_crypto) = seller_crypto_shares(&totals, rate)
        .ok_or_else(|| ApiError::External("price feed returned unusable rate".into()))?;

    // Create and lock every balance row involved, in one global order.
    let wallet_ids = wallet_lock_order(buyer_id, &totals);
    for user_id in &wallet_ids {
        wallets::ensure(&mut *tx, *user_id).await?;
    }
    let balances = wallets::lock_balances(&mut tx, &wallet_ids).await?;
    let available = balances
        .iter()
        .find(|balance| balance.user_id == buyer_id)
        .map(|balance| balance.coin_balance(payload.currency))
        .unwrap_or_default();
    if available < total_crypto {
        return Err(ApiError::InsufficientFunds("Insufficient balance".into()));
    }

    let order_id = insert_order(&mut tx, buyer_id, total_eur).await?;
    for item in &payload.items {
        let product = &products[&item.product_id];
        insert_order_item(&mut tx, order_id, product.id, item.quantity, product.price_eur).await?;
    }
    for (&product_id, &quantity) in &quantities {
        decrement_stock(&mut tx, product_id, quantity).await?;
    }

    let order_ref = short_order_ref(order_id);

    // Buyer side: one debit and one outgoing purchase entry for the whole order.
    wallets::apply(
        &mut *tx,
        buyer_id,
        &BalanceDelta::coin_debit(payload.currency, total_crypto),
    )
    .await?;
    ledger::insert(
        &mut *tx,
        &NewLedgerEntry {
            user_id: buyer_id,
            entry_type: EntryType::Purchase,
            direction: EntryDirection::Outgoing,
            amount_eur: -total_eur,
            amount_crypto: -total_crypto,
            currency: payload.currency,
            tx_hash: None,
            confirmations: 0,
            status: EntryStatus::Completed,
            description: Some(format!("Order #{order_ref} ({})", payload.currency)),
            from_username: None,
            related_order_id: Some(order_id),
        },
    )
    .await?;

    let buyer_username = username_of(&mut *tx, buyer_id).await?;

    // Seller side: split the proceeds per seller.
    for (&seller_id, &eur_share) in &totals {
        let crypto_share = shares[&seller_id];
        wallets::apply(
            &mut *tx,
            seller_id,
            &BalanceDelta::coin_credit(payload.currency, crypto_share),
        )
        .await?;
        ledger::insert(
            &mut *tx,
            &NewLedgerEntry {
                user_id: seller_id,
                entry_type: EntryType::Sale,
                direction: EntryDirection::Incoming,
                amount_eur: eur_share,
                amount_crypto: crypto_share,
                currency: payload.currency,
                tx_hash: None,
                confirmations: 0,
                status: EntryStatus::Completed,
                description: Some(format!("Sale #{order_ref} ({})", payload.currency)),
                from_username: buyer_username.clone(),
                related_order_id: Some(order_id),
            },
        )
        .await?;
    }

    confirm_order(&mut tx, order_id).await?;
    tx.commit().await?;

    tracing::info!(
        "order {order_id} confirmed for buyer {buyer_id}: {total_eur} EUR / {total_crypto} {} across {} seller(s)",
        payload.currency,
        totals.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            order_id,
            total_eur,
            total_crypto,
            currency: payload.currency,
            status: "confirmed",
        }),
    ))
}

pub fn order_routes(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn product(seller: Uuid, price: &str, stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            seller_id: seller,
            title: "item".into(),
            price_eur: dec(price),
            stock,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(product_id: Uuid, quantity: i32) -> OrderItemRequest {
        OrderItemRequest { product_id, quantity }
    }

    #[test]
    fn quantities_lock_in_product_id_order() {
        let low: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let high: Uuid = "ffffffff-0000-0000-0000-000000000000".parse().unwrap();
        // client lists products high-first; the aggregate iterates low-first
        let quantities = aggregate_quantities(&[item(high, 1), item(low, 2)]);
        let keys: Vec<Uuid> = quantities.keys().copied().collect();
        assert_eq!(keys, vec![low, high]);
    }

    #[test]
    fn duplicate_lines_sum_before_the_stock_check() {
        let product = Uuid::new_v4();
        // two lines of 4 against stock 5 must be seen as a demand of 8
        let quantities = aggregate_quantities(&[item(product, 4), item(product, 4)]);
        assert_eq!(quantities[&product], 8);
        assert!(quantities[&product] > 5);
    }

    #[test]
    fn totals_group_products_by_seller() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let p1 = product(alice, "10", 100);
        let p2 = product(bob, "5.50", 100);
        let p3 = product(alice, "3", 100);

        let mut quantities = BTreeMap::new();
        quantities.insert(p1.id, 2);
        quantities.insert(p2.id, 1);
        quantities.insert(p3.id, 4);
        let mut products = BTreeMap::new();
        products.insert(p1.id, p1);
        products.insert(p2.id, p2);
        products.insert(p3.id, p3);

        let totals = seller_totals(&products, &quantities);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[&alice], dec("32"));
        assert_eq!(totals[&bob], dec("5.50"));
    }

    #[test]
    fn wallet_locks_follow_ascending_user_id() {
        let buyer: Uuid = "ffffffff-0000-0000-0000-000000000000".parse().unwrap();
        let seller_a: Uuid = "00000000-0000-0000-0000-000000000002".parse().unwrap();
        let seller_b: Uuid = "aaaaaaaa-0000-0000-0000-000000000000".parse().unwrap();
        let mut sellers = BTreeMap::new();
        sellers.insert(seller_b, dec("10"));
        sellers.insert(seller_a, dec("20"));

        let order = wallet_lock_order(buyer, &sellers);
        assert_eq!(order, vec![seller_a, seller_b, buyer]);

        // a buyer who is also a seller appears once
        sellers.insert(buyer, dec("5"));
        let order = wallet_lock_order(buyer, &sellers);
        assert_eq!(order, vec![seller_a, seller_b, buyer]);
    }

    #[test]
    fn buyer_debit_equals_sum_of_seller_credits() {
        let mut totals = BTreeMap::new();
        totals.insert(Uuid::new_v4(), dec("33.33"));
        totals.insert(Uuid::new_v4(), dec("66.67"));
        let (shares, total) = seller_crypto_shares(&totals, dec("90000")).unwrap();
        let sum: Decimal = shares.values().copied().sum();
        assert_eq!(sum, total);
        // each share carries at most 8 decimal places
        for share in shares.values() {
            assert!(share.scale() <= 8);
        }
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut totals = BTreeMap::new();
        totals.insert(Uuid::new_v4(), dec("10"));
        assert!(seller_crypto_shares(&totals, Decimal::ZERO).is_none());
    }

    #[test]
    fn order_ref_is_first_eight_hex_chars() {
        let id: Uuid = "a1b2c3d4-0000-0000-0000-000000000000".parse().unwrap();
        assert_eq!(short_order_ref(id), "a1b2c3d4");
    }
}
