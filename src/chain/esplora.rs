use serde::Deserialize;

use crate::error::ApiError;
use crate::money;

use super::ObservedTx;

#[derive(Debug, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<EsploraVout>,
    #[serde(default)]
    pub status: EsploraTxStatus,
}

#[derive(Debug, Deserialize)]
pub struct EsploraVout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct EsploraTxStatus {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
}

impl EsploraTx {
    /// Sub-units received by `address` across this transaction's outputs.
    /// Outputs to other addresses (change and co-recipients) are ignored.
    pub fn received_subunits(&self, address: &str) -> u64 {
        self.vout
            .iter()
            .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
            .map(|out| out.value)
            .sum()
    }

    /// Confirmation count against the given chain tip, floored at zero.
    pub fn confirmations(&self, tip_height: u64) -> u32 {
        match (self.status.confirmed, self.status.block_height) {
            (true, Some(height)) => {
                let depth = tip_height as i64 - height as i64 + 1;
                depth.max(0) as u32
            }
            _ => 0,
        }
    }
}

/// Esplora-style block explorer (mempool.space for BTC, litecoinspace for LTC).
pub struct EsploraClient {
    client: reqwest::Client,
    base_url: String,
}

impl EsploraClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn address_txs(&self, address: &str) -> Result<Vec<EsploraTx>, ApiError> {
        let url = format!("{}/address/{}/txs", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ApiError::External(format!("explorer request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "explorer returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ApiError::External(format!("explorer returned malformed payload: {err}")))
    }

    pub async fn tip_height(&self) -> Result<u64, ApiError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ApiError::External(format!("explorer request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "explorer returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| ApiError::External(format!("explorer returned malformed payload: {err}")))?;
        body.trim()
            .parse::<u64>()
            .map_err(|err| ApiError::External(format!("bad tip height `{body}`: {err}")))
    }

    /// Fetch and normalize every payment to `address`. The chain tip is only
    /// fetched when at least one transaction is confirmed.
    pub async fn observe(&self, address: &str) -> Result<Vec<ObservedTx>, ApiError> {
        let txs = self.address_txs(address).await?;
        let needs_tip = txs.iter().any(|tx| tx.status.confirmed);
        let tip = if needs_tip { self.tip_height().await? } else { 0 };

        Ok(txs
            .into_iter()
            .filter_map(|tx| {
                let subunits = tx.received_subunits(address);
                if subunits == 0 {
                    return None;
                }
                Some(ObservedTx {
                    confirmations: tx.confirmations(tip),
                    amount: money::subunits_to_coin(subunits),
                    hash: tx.txid,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TX: &str = r#"{
        "txid": "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16",
        "vout": [
            {"scriptpubkey_address": "bc1qwatched", "value": 55557},
            {"scriptpubkey_address": "bc1qchange", "value": 194443}
        ],
        "status": {"confirmed": true, "block_height": 850000}
    }"#;

    #[test]
    fn sums_only_outputs_to_watched_address() {
        let tx: EsploraTx = serde_json::from_str(SAMPLE_TX).unwrap();
        assert_eq!(tx.received_subunits("bc1qwatched"), 55_557);
        assert_eq!(tx.received_subunits("bc1qchange"), 194_443);
        assert_eq!(tx.received_subunits("bc1qelsewhere"), 0);
    }

    #[test]
    fn confirmation_depth_from_tip() {
        let tx: EsploraTx = serde_json::from_str(SAMPLE_TX).unwrap();
        assert_eq!(tx.confirmations(850_000), 1);
        assert_eq!(tx.confirmations(850_005), 6);
        // tip lagging behind the block height floors at zero
        assert_eq!(tx.confirmations(849_998), 0);
    }

    #[test]
    fn unconfirmed_transactions_have_zero_confirmations() {
        let tx: EsploraTx = serde_json::from_str(
            r#"{"txid": "ab", "vout": [], "status": {"confirmed": false}}"#,
        )
        .unwrap();
        assert_eq!(tx.confirmations(850_000), 0);
    }

    #[test]
    fn tolerates_missing_vout_and_status() {
        let tx: EsploraTx = serde_json::from_str(r#"{"txid": "cd"}"#).unwrap();
        assert_eq!(tx.received_subunits("bc1qwatched"), 0);
        assert_eq!(tx.confirmations(1), 0);
    }
}
