use std::sync::Arc;

use sqlx::PgPool;

use crate::chain::blockcypher::{BlockCypherClient, BroadcastApi};
use crate::money::Currency;
use crate::rates::RateClient;
use crate::routes::auth::AuthService;

/// Shared state for all authenticated routes.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub auth: Arc<AuthService>,
    pub rates: Arc<RateClient>,
    pub blockcypher: Arc<BlockCypherClient>,
    pub broadcast: Arc<dyn BroadcastApi>,
    pub shared_btc_address: Option<String>,
    pub shared_ltc_address: Option<String>,
}

impl AppState {
    pub fn shared_address(&self, currency: Currency) -> Option<&str> {
        match currency {
            Currency::Btc => self.shared_btc_address.as_deref(),
            Currency::Ltc => self.shared_ltc_address.as_deref(),
        }
    }
}
