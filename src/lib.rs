//! bdshop - storefront service
//!
//! Catalog, cart, checkout, payments and coupons behind a JSON API.
//!
//! ## Features
//! - Product catalog with categories, search and live stock counters
//! - Per-user carts bounded by available stock
//! - Atomic checkout that snapshots cart lines into immutable order lines
//! - Coupons (percentage with cap, or fixed amount)
//! - Payments, address book, wishlist and reviews
//! - Sales dashboard

pub mod api;
pub mod config;
pub mod domain;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::CouponRejection;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("Product not found")]
    ProductNotFound,

    #[error("Category not found")]
    CategoryNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Address not found")]
    AddressNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Item is not in the cart")]
    CartItemNotFound,

    #[error("Your cart is empty")]
    EmptyCart,

    #[error("{product} is out of stock: requested {requested}, only {available} available")]
    StockUnavailable {
        product_id: Uuid,
        product: String,
        requested: i32,
        available: i32,
    },

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Amount exceeds the supported range")]
    AmountOutOfRange,

    #[error("Invalid coupon code {0}")]
    CouponNotFound(String),

    #[error("Coupon {code} cannot be applied: {reason}")]
    InvalidCoupon { code: String, reason: CouponRejection },

    #[error("Cannot move from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("This order is already paid")]
    AlreadyPaid,

    #[error("You can only review products you have purchased")]
    NotPurchased,

    #[error("Username {0} is already taken")]
    DuplicateUser(String),

    #[error("Could not allocate a unique order number")]
    OrderNumberExhausted,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<validator::ValidationErrors> for ShopError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ShopError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShopError>;
