use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::ApiError;
use crate::money::Currency;

use super::auth::AuthService;

#[inline]
pub fn validate_auth_token(headers: &HeaderMap, service: &AuthService) -> Result<Uuid, ApiError> {
    let jwt_header_token = match headers.get("Authorization").map(|token| token.to_str()) {
        Some(Ok(token)) => token.trim_start_matches("Bearer "),
        _ => {
            return Err(ApiError::Unauthorized);
        }
    };
    //validate our token
    service.verify_token(jwt_header_token)
}

#[inline]
pub fn check_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::Validation("Password must be at least 8 characters".into()));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(ApiError::Validation("Password must contain at least one uppercase letter".into()));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(ApiError::Validation("Password must contain at least one lowercase letter".into()));
    }
    if !password.chars().any(|c| c.is_digit(10)) {
        return Err(ApiError::Validation("Password must contain at least one digit".into()));
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err(ApiError::Validation("Password must contain at least one special character".into()));
    }
    Ok(())
}

fn is_base58(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l'))
}

fn is_bech32_payload(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
}

/// Format check for a withdrawal destination. Legacy base58 and bech32 shapes
/// per coin; anything else is rejected before any external call is made.
pub fn validate_destination_address(currency: Currency, address: &str) -> Result<(), ApiError> {
    let valid = match currency {
        Currency::Btc => {
            if let Some(payload) = address.strip_prefix("bc1") {
                (39..=59).contains(&payload.len()) && is_bech32_payload(payload)
            } else {
                let mut chars = address.chars();
                matches!(chars.next(), Some('1') | Some('3'))
                    && (25..=34).contains(&address.len().saturating_sub(1))
                    && is_base58(&address[1..])
            }
        }
        Currency::Ltc => {
            if let Some(payload) = address.strip_prefix("ltc1") {
                (39..=59).contains(&payload.len()) && is_bech32_payload(payload)
            } else {
                let mut chars = address.chars();
                matches!(chars.next(), Some('L') | Some('M') | Some('3'))
                    && (26..=33).contains(&address.len().saturating_sub(1))
                    && is_base58(&address[1..])
            }
        }
    };

    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "Invalid {} address",
            currency.coin_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_btc_address_shapes() {
        assert!(validate_destination_address(
            Currency::Btc,
            "1BoatSLRHtKNngkdXEeobR76b53LETtpyT"
        )
        .is_ok());
        assert!(validate_destination_address(
            Currency::Btc,
            "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"
        )
        .is_ok());
        let bech32 = format!("bc1{}", "q".repeat(39));
        assert!(validate_destination_address(Currency::Btc, &bech32).is_ok());
    }

    #[test]
    fn rejects_malformed_btc_addresses() {
        // base58 forbids 0, O, I, l
        assert!(validate_destination_address(Currency::Btc, "10Ol1BoatSLRHtKNngkdXEeobR76b").is_err());
        assert!(validate_destination_address(Currency::Btc, "1short").is_err());
        // bech32 payload must be lowercase
        let upper = format!("bc1{}", "Q".repeat(39));
        assert!(validate_destination_address(Currency::Btc, &upper).is_err());
        assert!(validate_destination_address(Currency::Btc, "bc1qtooshort").is_err());
        assert!(validate_destination_address(Currency::Btc, "").is_err());
    }

    #[test]
    fn accepts_known_ltc_address_shapes() {
        assert!(validate_destination_address(
            Currency::Ltc,
            "LM2WMpR1Rp6j3Sa59cMXMs1SPzj9eXpGc1"
        )
        .is_ok());
        let bech32 = format!("ltc1{}", "q".repeat(39));
        assert!(validate_destination_address(Currency::Ltc, &bech32).is_ok());
    }

    #[test]
    fn coin_prefixes_are_not_interchangeable() {
        // a bech32 BTC address is not a valid LTC destination
        let btc = format!("bc1{}", "q".repeat(39));
        assert!(validate_destination_address(Currency::Ltc, &btc).is_err());
        assert!(validate_destination_address(
            Currency::Btc,
            "LM2WMpR1Rp6j3Sa59cMXMs1SPzj9eXpGc1"
        )
        .is_err());
    }

    #[test]
    fn password_rules_match_registration_policy() {
        assert!(check_password("Str0ng!pass").is_ok());
        assert!(check_password("short1!").is_err());
        assert!(check_password("alllower1!").is_err());
        assert!(check_password("ALLUPPER1!").is_err());
        assert!(check_password("NoDigits!!").is_err());
        assert!(check_password("NoSpecial11").is_err());
    }
}
