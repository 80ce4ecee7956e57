//! Payment Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;
use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::ShopError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentState { #[default] Pending, Processing, Completed, Failed, Cancelled, Refunded }

impl PaymentState {
    pub fn can_transition_to(self, next: PaymentState) -> bool {
        use PaymentState::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Completed) | (Pending, Failed) | (Pending, Cancelled)
                | (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled)
                | (Completed, Refunded)
        )
    }

    /// The order-level payment status this payment state implies, if any.
    pub fn order_payment_status(self) -> Option<PaymentStatus> {
        match self {
            Self::Completed => Some(PaymentStatus::Paid),
            Self::Failed => Some(PaymentStatus::Failed),
            Self::Refunded => Some(PaymentStatus::Refunded),
            Self::Pending | Self::Processing | Self::Cancelled => None,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending", Self::Processing => "processing", Self::Completed => "completed",
            Self::Failed => "failed", Self::Cancelled => "cancelled", Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentState,
    pub details: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status report for a payment, e.g. from a gateway callback.
#[derive(Clone, Debug, Deserialize)]
pub struct PaymentUpdate {
    pub status: PaymentState,
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl Payment {
    /// Start a payment for `order`. Cash on delivery is settled on the spot.
    pub fn initiate(order: &Order, method: PaymentMethod) -> Result<Self, ShopError> {
        if order.is_paid() { return Err(ShopError::AlreadyPaid); }
        if order.status == OrderStatus::Cancelled {
            return Err(ShopError::InvalidStatusTransition { from: order.status.to_string(), to: "paid".into() });
        }
        let now = Utc::now();
        let id = Uuid::now_v7();
        let mut payment = Self {
            id, order_id: order.id, payment_method: method, transaction_id: None, amount: order.total,
            status: PaymentState::Pending, details: Json(serde_json::json!({})), created_at: now, updated_at: now,
        };
        if method == PaymentMethod::Cod {
            payment.status = PaymentState::Completed;
            payment.transaction_id = Some(format!("COD-{}", id.simple()));
        }
        Ok(payment)
    }

    pub fn apply(&mut self, update: PaymentUpdate) -> Result<(), ShopError> {
        if !self.status.can_transition_to(update.status) {
            return Err(ShopError::InvalidStatusTransition { from: self.status.to_string(), to: update.status.to_string() });
        }
        self.status = update.status;
        if update.transaction_id.is_some() { self.transaction_id = update.transaction_id; }
        if let Some(details) = update.details { self.details = Json(details); }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Carry this payment's outcome over to the order's payment status. A
    /// failed attempt never downgrades an order that another payment settled.
    pub fn settle(&self, order: &mut Order) -> Result<(), ShopError> {
        match self.status.order_payment_status() {
            Some(PaymentStatus::Failed) if order.is_paid() => Ok(()),
            Some(next) if next != order.payment_status => order.set_payment_status(next),
            _ => Ok(()),
        }
    }
}
