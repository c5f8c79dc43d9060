use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::chain::blockcypher::BlockCypherClient;
use crate::chain::esplora::EsploraClient;
use crate::chain::ObservedTx;
use crate::db::addresses::AddressRepository;
use crate::db::deposits::DepositRepository;
use crate::money::Currency;
use crate::settlement::{DepositScope, SettlementEngine, SettlementOutcome};

/// Periodic scan of the shared pool addresses and every active dedicated
/// address. Each observed payment is handed to the settlement engine; the
/// engine's dedup makes the whole tick idempotent.
pub struct ChainObserver {
    engine: SettlementEngine,
    addresses: AddressRepository,
    esplora_btc: Arc<EsploraClient>,
    esplora_ltc: Arc<EsploraClient>,
    blockcypher: Arc<BlockCypherClient>,
    shared_btc_address: Option<String>,
    shared_ltc_address: Option<String>,
}

impl ChainObserver {
    pub fn new(
        pool: PgPool,
        esplora_btc: Arc<EsploraClient>,
        esplora_ltc: Arc<EsploraClient>,
        blockcypher: Arc<BlockCypherClient>,
        shared_btc_address: Option<String>,
        shared_ltc_address: Option<String>,
    ) -> Self {
        Self {
            engine: SettlementEngine::new(pool.clone()),
            addresses: AddressRepository::new(pool),
            esplora_btc,
            esplora_ltc,
            blockcypher,
            shared_btc_address,
            shared_ltc_address,
        }
    }

    pub async fn run(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            self.scan_once().await;
        }
    }

    /// One full pass. Failures on a single address are logged and skipped so
    /// one flaky explorer cannot stall the rest of the scan.
    pub async fn scan_once(&self) {
        if let Some(address) = self.shared_btc_address.clone() {
            self.scan_shared(Currency::Btc, &address).await;
        }
        if let Some(address) = self.shared_ltc_address.clone() {
            self.scan_shared(Currency::Ltc, &address).await;
        }
        self.scan_dedicated().await;
    }

    async fn scan_shared(&self, currency: Currency, address: &str) {
        let explorer = match currency {
            Currency::Btc => &self.esplora_btc,
            Currency::Ltc => &self.esplora_ltc,
        };
        match explorer.observe(address).await {
            Ok(observed) => {
                self.settle_all(currency, DepositScope::Shared, &observed).await;
            }
            Err(err) => {
                tracing::warn!("shared {currency} address scan failed: {err}");
            }
        }
    }

    async fn scan_dedicated(&self) {
        let user_addresses = match self.addresses.all_active().await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!("failed to load dedicated addresses: {err}");
                return;
            }
        };

        for entry in user_addresses {
            let observed = match entry.currency {
                Currency::Btc => self.esplora_btc.observe(&entry.address).await,
                Currency::Ltc => self.blockcypher.observe(Currency::Ltc, &entry.address).await,
            };
            match observed {
                Ok(observed) => {
                    self.settle_all(entry.currency, DepositScope::Dedicated(entry.user_id), &observed)
                        .await;
                }
                Err(err) => {
                    tracing::warn!(
                        "scan of {} address {} failed: {err}",
                        entry.currency,
                        entry.address
                    );
                }
            }
        }
    }

    async fn settle_all(&self, currency: Currency, scope: DepositScope, observed: &[ObservedTx]) {
        for tx in observed {
            match self.engine.process(currency, scope, tx).await {
                Ok(SettlementOutcome::Confirmed(request_id)) => {
                    tracing::info!("deposit request {request_id} settled by tx {}", tx.hash);
                }
                Ok(SettlementOutcome::Received(request_id)) => {
                    tracing::info!("deposit request {request_id} awaiting confirmation of tx {}", tx.hash);
                }
                Ok(SettlementOutcome::Unmatched) | Ok(SettlementOutcome::AlreadyProcessed) => {}
                Err(err) => {
                    tracing::error!("settlement of tx {} failed: {err}", tx.hash);
                }
            }
        }
    }
}

/// Sweep overdue pending deposit requests to expired on a fixed cadence.
pub async fn run_expiry_sweep(deposits: DepositRepository, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match deposits.expire_overdue().await {
            Ok(0) => {}
            Ok(count) => tracing::info!("expired {count} deposit requests"),
            Err(err) => tracing::error!("expiry sweep failed: {err}"),
        }
    }
}
