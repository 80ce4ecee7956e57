//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::aggregates::MAX_PRICE;
use crate::domain::value_objects::{round_money, CouponCode};
use crate::ShopError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType { #[default] Percentage, Fixed }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_purchase: Decimal,
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub usage_limit: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    #[serde(default)]
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_purchase: Decimal,
    pub max_discount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: DateTime<Utc>,
    pub usage_limit: Option<i32>,
}

/// Why a coupon cannot be applied right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection { Inactive, NotYetValid, Expired, UsageExhausted, BelowMinimum { min_purchase: Decimal } }

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "coupon is not active"),
            Self::NotYetValid => write!(f, "coupon is not valid yet"),
            Self::Expired => write!(f, "coupon has expired"),
            Self::UsageExhausted => write!(f, "coupon usage limit reached"),
            Self::BelowMinimum { min_purchase } => write!(f, "minimum purchase is {min_purchase}"),
        }
    }
}

/// Result of trying a coupon against a cart without consuming it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CouponPreview {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub new_total: Decimal,
}

impl Coupon {
    pub fn create(new: NewCoupon) -> Result<Self, ShopError> {
        let code = CouponCode::new(new.code).map_err(|e| ShopError::Validation(e.to_string()))?;
        let now = Utc::now();
        let valid_from = new.valid_from.unwrap_or(now);
        let discount_value = round_money(new.discount_value);
        if discount_value <= Decimal::ZERO { return Err(ShopError::Validation("discount_value: must be positive".into())); }
        if new.discount_type == DiscountType::Percentage && discount_value > Decimal::ONE_HUNDRED {
            return Err(ShopError::Validation("discount_value: percentage above 100".into()));
        }
        let min_purchase = round_money(new.min_purchase);
        if min_purchase.is_sign_negative() { return Err(ShopError::Validation("min_purchase: must not be negative".into())); }
        let max_discount = new.max_discount.map(round_money);
        if max_discount.is_some_and(|cap| cap.is_sign_negative()) {
            return Err(ShopError::Validation("max_discount: must not be negative".into()));
        }
        for amount in [discount_value, min_purchase].into_iter().chain(max_discount) {
            if amount > MAX_PRICE { return Err(ShopError::Validation(format!("amount {amount} exceeds {MAX_PRICE}"))); }
        }
        if new.valid_to < valid_from { return Err(ShopError::Validation("valid_to: before valid_from".into())); }
        let usage_limit = new.usage_limit.unwrap_or(1);
        if usage_limit < 1 { return Err(ShopError::Validation("usage_limit: must be at least 1".into())); }
        Ok(Self {
            id: Uuid::now_v7(), code: code.into_string(), discount_type: new.discount_type,
            discount_value, min_purchase, max_discount: max_discount.filter(|cap| !cap.is_zero()),
            valid_from, valid_to: new.valid_to, usage_limit, used_count: 0, is_active: true, created_at: now,
        })
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool { self.availability(now).is_ok() }

    fn availability(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active { return Err(CouponRejection::Inactive); }
        if now < self.valid_from { return Err(CouponRejection::NotYetValid); }
        if now > self.valid_to { return Err(CouponRejection::Expired); }
        if self.used_count >= self.usage_limit { return Err(CouponRejection::UsageExhausted); }
        Ok(())
    }

    /// Check the coupon can be applied to an order of `subtotal` at `now`.
    pub fn check(&self, now: DateTime<Utc>, subtotal: Decimal) -> Result<(), CouponRejection> {
        self.availability(now)?;
        if subtotal < self.min_purchase { return Err(CouponRejection::BelowMinimum { min_purchase: self.min_purchase }); }
        Ok(())
    }

    /// Discount for `subtotal`, assuming [`Coupon::check`] passed. Never exceeds
    /// the subtotal. A zero `max_discount` means the percentage is uncapped.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let discount = match self.discount_type {
            DiscountType::Percentage => {
                let pct = round_money(subtotal * self.discount_value / Decimal::ONE_HUNDRED);
                match self.max_discount { Some(cap) if !cap.is_zero() && pct > cap => cap, _ => pct }
            }
            DiscountType::Fixed => self.discount_value,
        };
        discount.min(subtotal).max(Decimal::ZERO)
    }

    pub fn preview(&self, now: DateTime<Utc>, subtotal: Decimal) -> Result<CouponPreview, ShopError> {
        self.check(now, subtotal).map_err(|reason| ShopError::InvalidCoupon { code: self.code.clone(), reason })?;
        let discount = self.discount_for(subtotal);
        Ok(CouponPreview {
            code: self.code.clone(), discount_type: self.discount_type, discount_value: self.discount_value,
            subtotal, discount, new_total: subtotal - discount,
        })
    }

    /// Count one redemption.
    pub fn record_use(&mut self) -> Result<(), ShopError> {
        if self.used_count >= self.usage_limit {
            return Err(ShopError::InvalidCoupon { code: self.code.clone(), reason: CouponRejection::UsageExhausted });
        }
        self.used_count += 1;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample(code: &str, discount_type: DiscountType, value: Decimal) -> Coupon {
    Coupon::create(NewCoupon {
        code: code.into(), discount_type, discount_value: value, min_purchase: Decimal::ZERO, max_discount: None,
        valid_from: Some(Utc::now() - chrono::Duration::days(1)), valid_to: Utc::now() + chrono::Duration::days(30), usage_limit: Some(10),
    }).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_percentage_discount_with_cap() {
        let mut coupon = sample("save10", DiscountType::Percentage, Decimal::new(10, 0));
        assert_eq!(coupon.code, "SAVE10");
        assert_eq!(coupon.discount_for(Decimal::new(1500, 0)), Decimal::new(150, 0));
        coupon.max_discount = Some(Decimal::new(100, 0));
        assert_eq!(coupon.discount_for(Decimal::new(1500, 0)), Decimal::new(100, 0));
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        let coupon = sample("FLAT500", DiscountType::Fixed, Decimal::new(500, 0));
        assert_eq!(coupon.discount_for(Decimal::new(800, 0)), Decimal::new(500, 0));
        assert_eq!(coupon.discount_for(Decimal::new(300, 0)), Decimal::new(300, 0));
    }

    #[test]
    fn test_validity_window_and_usage() {
        let now = Utc::now();
        let mut coupon = sample("X", DiscountType::Fixed, Decimal::new(5, 0));
        assert!(coupon.is_valid(now));
        assert_eq!(coupon.check(now + Duration::days(31), Decimal::ONE), Err(CouponRejection::Expired));
        assert_eq!(coupon.check(now - Duration::days(2), Decimal::ONE), Err(CouponRejection::NotYetValid));
        coupon.used_count = coupon.usage_limit;
        assert_eq!(coupon.check(now, Decimal::ONE), Err(CouponRejection::UsageExhausted));
        assert!(coupon.record_use().is_err());
        assert_eq!(coupon.used_count, coupon.usage_limit);
    }

    #[test]
    fn test_minimum_purchase() {
        let mut coupon = sample("BIG", DiscountType::Fixed, Decimal::new(50, 0));
        coupon.min_purchase = Decimal::new(500, 0);
        let err = coupon.preview(Utc::now(), Decimal::new(499, 0)).unwrap_err();
        assert!(matches!(err, ShopError::InvalidCoupon { reason: CouponRejection::BelowMinimum { .. }, .. }));
        let preview = coupon.preview(Utc::now(), Decimal::new(500, 0)).unwrap();
        assert_eq!(preview.new_total, Decimal::new(450, 0));
    }

    #[test]
    fn test_zero_cap_means_uncapped() {
        let mut coupon = sample("NOCAP", DiscountType::Percentage, Decimal::new(20, 0));
        coupon.max_discount = Some(Decimal::ZERO);
        assert_eq!(coupon.discount_for(Decimal::new(1500, 0)), Decimal::new(300, 0));

        let created = Coupon::create(NewCoupon {
            code: "ZERO".into(), discount_type: DiscountType::Percentage, discount_value: Decimal::new(10, 0),
            min_purchase: Decimal::ZERO, max_discount: Some(Decimal::ZERO), valid_from: None,
            valid_to: Utc::now() + Duration::days(1), usage_limit: None,
        }).unwrap();
        assert_eq!(created.max_discount, None);
    }

    #[test]
    fn test_amounts_rounded_to_cents() {
        let coupon = Coupon::create(NewCoupon {
            code: "ODD".into(), discount_type: DiscountType::Fixed, discount_value: Decimal::new(12_345, 3),
            min_purchase: Decimal::new(99_995, 3), max_discount: Some(Decimal::new(5_004, 3)), valid_from: None,
            valid_to: Utc::now() + Duration::days(1), usage_limit: None,
        }).unwrap();
        assert_eq!(coupon.discount_value, Decimal::new(1235, 2));
        assert_eq!(coupon.min_purchase, Decimal::new(10000, 2));
        assert_eq!(coupon.max_discount, Some(Decimal::new(500, 2)));
        assert_eq!(coupon.discount_for(Decimal::new(50, 0)), Decimal::new(1235, 2));
    }

    #[test]
    fn test_rejects_negative_minimum() {
        let new = NewCoupon {
            code: "NEG".into(), discount_type: DiscountType::Fixed, discount_value: Decimal::ONE,
            min_purchase: Decimal::new(-1, 0), max_discount: None, valid_from: None, valid_to: Utc::now() + Duration::days(1), usage_limit: None,
        };
        assert!(matches!(Coupon::create(new), Err(ShopError::Validation(_))));
    }

    #[test]
    fn test_rejects_bad_percentage() {
        let new = NewCoupon {
            code: "HUGE".into(), discount_type: DiscountType::Percentage, discount_value: Decimal::new(150, 0),
            min_purchase: Decimal::ZERO, max_discount: None, valid_from: None, valid_to: Utc::now() + Duration::days(1), usage_limit: None,
        };
        assert!(matches!(Coupon::create(new), Err(ShopError::Validation(_))));
    }
}
