use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::money::{self, Currency};

use super::ObservedTx;

#[derive(Debug, Deserialize)]
pub struct FullAddress {
    #[serde(default)]
    pub txs: Vec<BlockCypherTx>,
}

#[derive(Debug, Deserialize)]
pub struct BlockCypherTx {
    pub hash: String,
    #[serde(default)]
    pub outputs: Vec<BlockCypherOutput>,
    #[serde(default)]
    pub confirmations: u32,
}

#[derive(Debug, Deserialize)]
pub struct BlockCypherOutput {
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    pub value: u64,
}

impl BlockCypherTx {
    pub fn received_subunits(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|out| {
                out.addresses
                    .as_ref()
                    .map(|addrs| addrs.iter().any(|a| a == address))
                    .unwrap_or(false)
            })
            .map(|out| out.value)
            .sum()
    }
}

#[derive(Debug, Deserialize)]
pub struct GeneratedAddress {
    pub address: String,
    pub private: String,
}

#[derive(Debug, Deserialize)]
struct SentTx {
    tx: SentTxInner,
}

#[derive(Debug, Deserialize)]
struct SentTxInner {
    hash: String,
}

/// External API that signs and broadcasts outgoing transactions. Behind a trait
/// so the withdrawal worker can run against a stub.
#[async_trait]
pub trait BroadcastApi: Send + Sync {
    async fn send(
        &self,
        currency: Currency,
        from_address: &str,
        private_key: &str,
        to_address: &str,
        amount_subunits: u64,
    ) -> Result<String, ApiError>;
}

/// BlockCypher client: address generation, full-address transaction listing,
/// and the two-step new/send broadcast flow.
pub struct BlockCypherClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BlockCypherClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn url(&self, currency: Currency, path: &str) -> String {
        let mut url = format!("{}/{}{}", self.base_url, currency.chain_path(), path);
        if let Some(token) = &self.token {
            url.push_str(&format!("?token={token}"));
        }
        url
    }

    /// Normalize every payment to `address` from the full-address endpoint.
    /// Confirmation counts come straight from the payload.
    pub async fn observe(&self, currency: Currency, address: &str) -> Result<Vec<ObservedTx>, ApiError> {
        let url = self.url(currency, &format!("/addrs/{address}/full"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "blockcypher returned {}",
                response.status()
            )));
        }
        let full: FullAddress = response
            .json()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher returned malformed payload: {err}")))?;

        Ok(full
            .txs
            .into_iter()
            .filter_map(|tx| {
                let subunits = tx.received_subunits(address);
                if subunits == 0 {
                    return None;
                }
                Some(ObservedTx {
                    confirmations: tx.confirmations,
                    amount: money::subunits_to_coin(subunits),
                    hash: tx.hash,
                })
            })
            .collect())
    }

    /// Generate a fresh address with its private key. The upstream endpoint is
    /// flaky under load, so one failed attempt is retried after a short delay.
    pub async fn generate_address(&self, currency: Currency) -> Result<GeneratedAddress, ApiError> {
        match self.try_generate_address(currency).await {
            Ok(generated) => Ok(generated),
            Err(err) => {
                tracing::warn!("address generation failed, retrying: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.try_generate_address(currency).await
            }
        }
    }

    async fn try_generate_address(&self, currency: Currency) -> Result<GeneratedAddress, ApiError> {
        let url = self.url(currency, "/addrs");
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "blockcypher address generation returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher returned malformed payload: {err}")))
    }
}

#[async_trait]
impl BroadcastApi for BlockCypherClient {
    async fn send(
        &self,
        currency: Currency,
        from_address: &str,
        private_key: &str,
        to_address: &str,
        amount_subunits: u64,
    ) -> Result<String, ApiError> {
        // Build the transaction skeleton.
        let new_url = self.url(currency, "/txs/new");
        let skeleton_body = serde_json::json!({
            "inputs": [{ "addresses": [from_address] }],
            "outputs": [{ "addresses": [to_address], "value": amount_subunits }]
        });
        let response = self
            .client
            .post(&new_url)
            .json(&skeleton_body)
            .send()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "failed to create {currency} transaction: {}",
                response.status()
            )));
        }
        let skeleton: Value = response
            .json()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher returned malformed payload: {err}")))?;

        // Hand the skeleton back with the key for signing and broadcast.
        let send_url = self.url(currency, "/txs/send");
        let response = self
            .client
            .post(&send_url)
            .json(&serde_json::json!({ "tx": skeleton, "private_keys": [private_key] }))
            .send()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "failed to send {currency} transaction: {}",
                response.status()
            )));
        }
        let sent: SentTx = response
            .json()
            .await
            .map_err(|err| ApiError::External(format!("blockcypher returned malformed payload: {err}")))?;

        tracing::info!("broadcast {currency} transaction {}", sent.tx.hash);
        Ok(sent.tx.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_outputs_listing_the_watched_address() {
        let tx: BlockCypherTx = serde_json::from_str(
            r#"{
                "hash": "deadbeef",
                "outputs": [
                    {"addresses": ["LWatched", "LCosigner"], "value": 70000},
                    {"addresses": ["LChange"], "value": 12345},
                    {"addresses": null, "value": 999}
                ],
                "confirmations": 3
            }"#,
        )
        .unwrap();
        assert_eq!(tx.received_subunits("LWatched"), 70_000);
        assert_eq!(tx.received_subunits("LChange"), 12_345);
        assert_eq!(tx.received_subunits("LOther"), 0);
        assert_eq!(tx.confirmations, 3);
    }

    #[test]
    fn parses_full_address_payload() {
        let full: FullAddress = serde_json::from_str(
            r#"{"txs": [{"hash": "ab", "outputs": [], "confirmations": 0}]}"#,
        )
        .unwrap();
        assert_eq!(full.txs.len(), 1);

        let empty: FullAddress = serde_json::from_str("{}").unwrap();
        assert!(empty.txs.is_empty());
    }

    #[test]
    fn parses_generated_address() {
        let generated: GeneratedAddress = serde_json::from_str(
            r#"{"address": "1BoatSLRHtKNngkdXEeobR76b53LETtpyT", "private": "aa00", "public": "bb11"}"#,
        )
        .unwrap();
        assert_eq!(generated.address, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
        assert_eq!(generated.private, "aa00");
    }
}
