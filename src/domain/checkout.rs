//! Checkout planning.
//!
//! [`CheckoutPlan::build`] turns a cart, read under lock together with its
//! live products, into the rows checkout will write: one order, one order line
//! per cart line, the stock to take, and the coupon to redeem. It performs no
//! I/O, so a store can validate everything before its first write and abort
//! with the cart untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{Cart, Coupon, Order, OrderLine, OrderStatus, PaymentMethod, PaymentStatus, MAX_PRICE};
use crate::domain::value_objects::OrderNumber;
use crate::ShopError;

/// Flat shipping fee, waived once the subtotal reaches the threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShippingPolicy { pub free_threshold: Decimal, pub flat_fee: Decimal }

impl ShippingPolicy {
    pub fn cost_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal < self.free_threshold { self.flat_fee } else { Decimal::ZERO }
    }
}

impl Default for ShippingPolicy {
    fn default() -> Self { Self { free_threshold: Decimal::new(1000, 0), flat_fee: Decimal::new(60, 0) } }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckoutSettings {
    pub shipping: ShippingPolicy,
    pub order_number_length: usize,
    pub order_number_attempts: u32,
}

impl Default for CheckoutSettings {
    fn default() -> Self { Self { shipping: ShippingPolicy::default(), order_number_length: 12, order_number_attempts: 5 } }
}

impl CheckoutSettings {
    pub fn order_number(&self) -> OrderNumber { OrderNumber::generate(self.order_number_length) }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_city: String,
    #[validate(length(min = 1, max = 10))]
    pub shipping_postal_code: String,
    #[validate(length(min = 1, max = 15))]
    pub shipping_phone: String,
    pub billing_address: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub coupon_code: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CheckoutPlan {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub coupon_id: Option<Uuid>,
}

impl CheckoutPlan {
    pub fn build(
        cart: &Cart,
        coupon: Option<&Coupon>,
        request: &CheckoutRequest,
        settings: &CheckoutSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, ShopError> {
        request.validate()?;
        if cart.is_empty() { return Err(ShopError::EmptyCart); }
        if let Some(item) = cart.items().iter().find(|i| !i.product.can_fulfil(i.quantity)) {
            return Err(item.product.stock_error(item.quantity));
        }

        let subtotal = cart.subtotal()?;
        let shipping_cost = settings.shipping.cost_for(subtotal);
        let discount = match coupon {
            Some(c) => {
                c.check(now, subtotal).map_err(|reason| ShopError::InvalidCoupon { code: c.code.clone(), reason })?;
                c.discount_for(subtotal)
            }
            None => Decimal::ZERO,
        };

        let total = subtotal.checked_add(shipping_cost).ok_or(ShopError::AmountOutOfRange)? - discount;
        if subtotal > MAX_PRICE || total > MAX_PRICE { return Err(ShopError::AmountOutOfRange); }

        let order = Order {
            id: Uuid::now_v7(),
            order_number: settings.order_number().into_string(),
            user_id: cart.user_id(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            shipping_address: request.shipping_address.trim().to_string(),
            shipping_city: request.shipping_city.trim().to_string(),
            shipping_postal_code: request.shipping_postal_code.trim().to_string(),
            shipping_phone: request.shipping_phone.trim().to_string(),
            billing_address: request.billing_address.clone().filter(|b| !b.trim().is_empty()),
            notes: request.notes.clone().filter(|n| !n.trim().is_empty()),
            coupon_code: coupon.map(|c| c.code.clone()),
            subtotal,
            shipping_cost,
            discount,
            total,
            created_at: now,
            updated_at: now,
        };
        let lines = cart.items().iter().map(|item| Ok(OrderLine {
            id: Uuid::now_v7(),
            order_id: order.id,
            product_id: item.product.id,
            product_name: item.product.name.clone(),
            price: item.product.price,
            quantity: item.quantity,
            total: item.line_total()?,
        })).collect::<Result<Vec<_>, ShopError>>()?;

        Ok(Self { order, lines, coupon_id: coupon.map(|c| c.id) })
    }

    /// (product, quantity) pairs to take out of stock.
    pub fn reservations(&self) -> impl Iterator<Item = (Uuid, i32)> + '_ {
        self.lines.iter().map(|l| (l.product_id, l.quantity))
    }

    /// Draw a fresh order number after a uniqueness conflict.
    pub fn renumber(&mut self, settings: &CheckoutSettings) {
        self.order.order_number = settings.order_number().into_string();
    }
}

#[cfg(test)]
pub(crate) fn request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: "House 7, Road 3, Dhanmondi".into(), shipping_city: "Dhaka".into(),
        shipping_postal_code: "1209".into(), shipping_phone: "01711111111".into(), billing_address: None,
        payment_method: PaymentMethod::Cod, notes: None, coupon_code: None,
    }
}
