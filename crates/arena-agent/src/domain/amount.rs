//! Decimal token amounts as agents write them ("10", "0.5").

use arena_types::{TOKEN_DECIMALS, U256};

use super::error::ApiError;

fn unit() -> U256 {
    U256::exp10(TOKEN_DECIMALS)
}

/// Parse a decimal token amount into base units.
pub fn parse_token_amount(raw: &str) -> Result<U256, ApiError> {
    let raw = raw.trim();
    let invalid = || ApiError::invalid_params(format!("'{}' is not a token amount", raw));

    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > TOKEN_DECIMALS {
        return Err(ApiError::invalid_params(format!(
            "at most {} decimal places",
            TOKEN_DECIMALS
        )));
    }

    let whole = if whole.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(whole).map_err(|_| invalid())?
    };
    let padded = format!("{:0<width$}", fraction, width = TOKEN_DECIMALS);
    let fraction = U256::from_dec_str(&padded).map_err(|_| invalid())?;

    whole
        .checked_mul(unit())
        .and_then(|units| units.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Render base units as a decimal token amount without trailing zeros.
pub fn format_token_amount(amount: U256) -> String {
    let (whole, fraction) = amount.div_mod(unit());
    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", fraction.to_string(), width = TOKEN_DECIMALS);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}
