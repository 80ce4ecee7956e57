//! Order Aggregate
//!
//! An order is written once at checkout. Afterwards only `status` and
//! `payment_status` move; the money fields, address strings and lines are a
//! frozen snapshot of the cart at purchase time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::ShopError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { #[default] Cod, Bkash, Nagad, Card, Bank }

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!((self, next), (Pending, Processing) | (Pending, Cancelled) | (Processing, Shipped) | (Processing, Cancelled) | (Shipped, Delivered))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { Self::Pending => "pending", Self::Processing => "processing", Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Cancelled => "cancelled" };
        f.write_str(s)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { Self::Pending => "pending", Self::Paid => "paid", Self::Failed => "failed", Self::Refunded => "refunded" };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_postal_code: String,
    pub shipping_phone: String,
    pub billing_address: Option<String>,
    pub notes: Option<String>,
    pub coupon_code: Option<String>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub total: Decimal,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), ShopError> {
        if !self.status.can_transition_to(next) {
            return Err(ShopError::InvalidStatusTransition { from: self.status.to_string(), to: next.to_string() });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn is_paid(&self) -> bool { self.payment_status == PaymentStatus::Paid }

    pub fn set_payment_status(&mut self, next: PaymentStatus) -> Result<(), ShopError> {
        use PaymentStatus::*;
        let allowed = matches!((self.payment_status, next), (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Failed, Pending) | (Paid, Refunded));
        if !allowed {
            return Err(ShopError::InvalidStatusTransition { from: self.payment_status.to_string(), to: next.to_string() });
        }
        self.payment_status = next;
        self.touch();
        Ok(())
    }

    /// Sum of line totals; equals `subtotal` for every order written by checkout.
    pub fn lines_total(lines: &[OrderLine]) -> Decimal { lines.iter().map(|l| l.total).sum() }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
pub(crate) fn sample() -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::now_v7(), order_number: "ABCDEFGH2345".into(), user_id: Uuid::now_v7(),
        status: OrderStatus::Pending, payment_status: PaymentStatus::Pending, payment_method: PaymentMethod::Cod,
        shipping_address: "House 1, Road 2".into(), shipping_city: "Dhaka".into(), shipping_postal_code: "1207".into(),
        shipping_phone: "01700000000".into(), billing_address: None, notes: None, coupon_code: None,
        subtotal: Decimal::new(100, 0), shipping_cost: Decimal::new(60, 0), discount: Decimal::ZERO, total: Decimal::new(160, 0),
        created_at: now, updated_at: now,
    }
}
