use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ApiError;
use crate::money::Currency;

/// EUR exchange rates for the supported coins, one price-feed snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub btc_eur: Decimal,
    pub ltc_eur: Decimal,
}

impl Rates {
    /// Fixed table used when the price feed is unreachable. Deposits and
    /// withdrawals keep working on a stale-but-sane rate instead of failing.
    pub fn fallback() -> Self {
        Self {
            btc_eur: Decimal::new(90_000, 0),
            ltc_eur: Decimal::new(100, 0),
        }
    }

    pub fn rate_for(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Btc => self.btc_eur,
            Currency::Ltc => self.ltc_eur,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PricePayload {
    bitcoin: PricePoint,
    litecoin: PricePoint,
}

#[derive(Debug, Deserialize)]
struct PricePoint {
    eur: Decimal,
}

impl PricePayload {
    fn into_rates(self) -> Result<Rates, ApiError> {
        if self.bitcoin.eur <= Decimal::ZERO || self.litecoin.eur <= Decimal::ZERO {
            return Err(ApiError::External("price feed returned non-positive rate".to_string()));
        }
        Ok(Rates {
            btc_eur: self.bitcoin.eur,
            ltc_eur: self.litecoin.eur,
        })
    }
}

/// Client for the public simple-price endpoint.
pub struct RateClient {
    client: reqwest::Client,
    base_url: String,
}

impl RateClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Fetch current rates, degrading to the fallback table on any failure.
    pub async fn fetch(&self) -> Rates {
        match self.try_fetch().await {
            Ok(rates) => rates,
            Err(err) => {
                tracing::warn!("price feed unavailable, using fallback rates: {err}");
                Rates::fallback()
            }
        }
    }

    async fn try_fetch(&self) -> Result<Rates, ApiError> {
        let url = format!(
            "{}/simple/price?ids=bitcoin,litecoin&vs_currencies=eur&precision=8",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ApiError::External(format!("price api request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApiError::External(format!(
                "price api returned {}",
                response.status()
            )));
        }
        let payload: PricePayload = response
            .json()
            .await
            .map_err(|err| ApiError::External(format!("price api returned malformed payload: {err}")))?;
        payload.into_rates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_price_payload() {
        let payload: PricePayload = serde_json::from_str(
            r#"{"bitcoin":{"eur":91234.56789012},"litecoin":{"eur":101.25}}"#,
        )
        .unwrap();
        let rates = payload.into_rates().unwrap();
        assert_eq!(rates.btc_eur.to_string(), "91234.56789012");
        assert_eq!(rates.ltc_eur.to_string(), "101.25");
    }

    #[test]
    fn rejects_non_positive_rates() {
        let payload: PricePayload =
            serde_json::from_str(r#"{"bitcoin":{"eur":0},"litecoin":{"eur":101.25}}"#).unwrap();
        assert!(payload.into_rates().is_err());
    }

    #[test]
    fn fallback_rates_are_fixed() {
        let rates = Rates::fallback();
        assert_eq!(rates.rate_for(Currency::Btc), Decimal::new(90_000, 0));
        assert_eq!(rates.rate_for(Currency::Ltc), Decimal::new(100, 0));
    }
}
