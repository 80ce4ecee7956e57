//! Value Objects for the storefront

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coupon code value object. Codes are matched case-insensitively, so they
/// are stored trimmed and uppercased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouponCode(String);

impl CouponCode {
    pub fn new(value: impl Into<String>) -> Result<Self, CouponCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(CouponCodeError::Empty); }
        if value.len() > 20 { return Err(CouponCodeError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CouponCodeError { Empty, TooLong }
impl std::error::Error for CouponCodeError {}
impl fmt::Display for CouponCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "Please enter coupon code"), Self::TooLong => write!(f, "Coupon code too long") }
    }
}

/// Human-readable order number. Drawn from an uppercase alphabet without the
/// easily confused characters `0`, `O`, `1` and `I`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNumber(String);

const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

impl OrderNumber {
    pub fn generate(len: usize) -> Self {
        let mut rng = rand::thread_rng();
        let token = (0..len.max(1))
            .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
            .collect();
        Self(token)
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Round a monetary amount to two decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// URL slug from a display name: lowercase ASCII alphanumerics joined by `-`.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_coupon_code() { let code = CouponCode::new("  save10 ").unwrap(); assert_eq!(code.as_str(), "SAVE10"); }
    #[test]
    fn test_coupon_code_rejects_blank() { assert_eq!(CouponCode::new("   "), Err(CouponCodeError::Empty)); }
    #[test]
    fn test_order_number_shape() {
        let number = OrderNumber::generate(12);
        assert_eq!(number.as_str().len(), 12);
        assert!(number.as_str().bytes().all(|b| ORDER_NUMBER_ALPHABET.contains(&b)));
    }
    #[test]
    fn test_round_money() { assert_eq!(round_money(Decimal::new(12345, 3)), Decimal::new(1235, 2)); }
    #[test]
    fn test_slugify() { assert_eq!(slugify("Walton 32\" LED TV"), "walton-32-led-tv"); }
}
