use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places of the smallest coin denomination (satoshi / litoshi).
pub const SUBUNIT_SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "coin", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[serde(alias = "btc")]
    Btc,
    #[serde(alias = "ltc")]
    Ltc,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Ltc => "LTC",
        }
    }

    pub fn coin_name(&self) -> &'static str {
        match self {
            Currency::Btc => "Bitcoin",
            Currency::Ltc => "Litecoin",
        }
    }

    /// Scheme used in BIP21-style payment URIs.
    pub fn uri_scheme(&self) -> &'static str {
        match self {
            Currency::Btc => "bitcoin",
            Currency::Ltc => "litecoin",
        }
    }

    /// Chain segment of BlockCypher API paths.
    pub fn chain_path(&self) -> &'static str {
        match self {
            Currency::Btc => "btc/main",
            Currency::Ltc => "ltc/main",
        }
    }

    pub fn parse(value: &str) -> Option<Currency> {
        match value.to_ascii_uppercase().as_str() {
            "BTC" => Some(Currency::Btc),
            "LTC" => Some(Currency::Ltc),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching window around an observed on-chain amount, in coin units (±2 sub-units).
pub fn tolerance() -> Decimal {
    Decimal::new(2, SUBUNIT_SCALE)
}

/// Convert a fiat amount to coin units at the given rate, rounded to sub-unit precision.
/// Returns `None` for a non-positive rate.
pub fn eur_to_crypto(amount_eur: Decimal, rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    amount_eur
        .checked_div(rate)
        .map(|v| v.round_dp(SUBUNIT_SCALE))
}

/// Coin-unit offset for a deposit fingerprint expressed in sub-units.
pub fn fingerprint_offset(fingerprint: i32) -> Decimal {
    Decimal::new(fingerprint as i64, SUBUNIT_SCALE)
}

/// Draw a fresh deposit fingerprint: 1 to 99 sub-units inclusive.
pub fn random_fingerprint() -> i32 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=99)
}

pub fn subunits_to_coin(subunits: u64) -> Decimal {
    Decimal::new(subunits as i64, SUBUNIT_SCALE)
}

/// Coin units to integer sub-units, truncating anything below one sub-unit.
pub fn coin_to_subunits(amount: Decimal) -> u64 {
    let scaled = (amount * Decimal::from(100_000_000u64)).trunc();
    scaled.to_u64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn eur_conversion_rounds_to_subunit_precision() {
        // 50 EUR at 90 000 EUR/BTC
        let amount = eur_to_crypto(dec("50"), dec("90000")).unwrap();
        assert_eq!(amount, dec("0.00055556"));
    }

    #[test]
    fn eur_conversion_rejects_bad_rate() {
        assert!(eur_to_crypto(dec("50"), Decimal::ZERO).is_none());
        assert!(eur_to_crypto(dec("50"), dec("-1")).is_none());
    }

    #[test]
    fn fingerprint_offset_stays_in_bounds() {
        assert_eq!(fingerprint_offset(1), dec("0.00000001"));
        assert_eq!(fingerprint_offset(99), dec("0.00000099"));
        for _ in 0..200 {
            let fp = random_fingerprint();
            assert!((1..=99).contains(&fp));
        }
    }

    #[test]
    fn fingerprinted_amount_for_fifty_eur_scenario() {
        let base = eur_to_crypto(dec("50"), dec("90000")).unwrap();
        assert_eq!(base + fingerprint_offset(1), dec("0.00055557"));
        assert_eq!(base + fingerprint_offset(99), dec("0.00055655"));
    }

    #[test]
    fn tolerance_window_is_two_subunits() {
        assert_eq!(tolerance(), dec("0.00000002"));
        // window edges around a requested amount
        let requested = dec("0.00055557");
        assert!((dec("0.00055555") - requested).abs() <= tolerance());
        assert!((dec("0.00055559") - requested).abs() <= tolerance());
        assert!((dec("0.00055554") - requested).abs() > tolerance());
        assert!((dec("0.00055560") - requested).abs() > tolerance());
    }

    #[test]
    fn subunit_conversions() {
        assert_eq!(subunits_to_coin(55_557), dec("0.00055557"));
        assert_eq!(coin_to_subunits(dec("0.00055557")), 55_557);
        // anything below one sub-unit truncates
        assert_eq!(coin_to_subunits(dec("0.000000019")), 1);
    }

    #[test]
    fn currency_parsing_is_case_insensitive() {
        assert_eq!(Currency::parse("btc"), Some(Currency::Btc));
        assert_eq!(Currency::parse("LTC"), Some(Currency::Ltc));
        assert_eq!(Currency::parse("xmr"), None);
    }
}
