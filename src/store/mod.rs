//! Repositories.
//!
//! Every data access goes through an explicit method here. Two backends
//! implement all of them: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for tests and database-less runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::domain::aggregates::{
    Account, AddressInput, CartSummary, Category, CheckoutDefaults, Coupon, CouponPreview, NewAccount, NewCategory,
    NewCoupon, NewProduct, Order, OrderDetail, OrderStatus, Payment, PaymentMethod, PaymentUpdate, Product,
    ProfileUpdate, Review, ReviewInput, ShippingAddress, UserProfile, WishlistItem,
};
use crate::domain::analytics::Dashboard;
use crate::domain::checkout::CheckoutRequest;
use crate::{Result, ShopError};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Clone, Copy, Debug)]
pub struct Page { pub page: u32, pub per_page: u32 }

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: per_page.unwrap_or(20).clamp(1, 100) }
    }
    /// Rows to skip. Widened so the largest page number cannot overflow.
    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
}

impl Default for Page {
    fn default() -> Self { Self::new(None, None) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort { #[default] Newest, PriceLow, PriceHigh, Name }

/// Catalog listing filters. Only active products are ever listed.
#[derive(Clone, Debug, Default)]
pub struct ProductQuery {
    /// Case-insensitive match against name, description and category name.
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub featured: Option<bool>,
    pub sort: ProductSort,
    pub page: Page,
}

impl ProductQuery {
    pub fn search_term(&self) -> Option<&str> { self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) }

    pub fn check(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max { return Err(ShopError::Validation("min_price: greater than max_price".into())); }
        }
        Ok(())
    }

    pub fn matches(&self, product: &Product, category_name: Option<&str>) -> bool {
        let hit = |text: Option<&str>, term: &str| text.is_some_and(|t| t.to_lowercase().contains(term));
        product.is_active
            && self.search_term().map(str::to_lowercase).map_or(true, |term| {
                hit(Some(product.name.as_str()), &term) || hit(product.description.as_deref(), &term) || hit(category_name, &term)
            })
            && self.category_id.map_or(true, |id| product.category_id == Some(id))
            && self.min_price.map_or(true, |min| product.price >= min)
            && self.max_price.map_or(true, |max| product.price <= max)
            && self.featured.map_or(true, |f| product.is_featured == f)
    }

    pub fn compare(&self, a: &Product, b: &Product) -> Ordering {
        match self.sort {
            ProductSort::Newest => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
            ProductSort::PriceLow => a.price.cmp(&b.price).then(a.id.cmp(&b.id)),
            ProductSort::PriceHigh => b.price.cmp(&a.price).then(a.id.cmp(&b.id)),
            ProductSort::Name => a.name.cmp(&b.name).then(a.id.cmp(&b.id)),
        }
    }
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create_product(&self, product: NewProduct) -> Result<Product>;
    async fn product(&self, id: Uuid) -> Result<Product>;
    /// Active products matching `query`, in its sort order.
    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>>;
    async fn restock(&self, id: Uuid, stock: i32) -> Result<Product>;
    async fn set_product_active(&self, id: Uuid, active: bool) -> Result<Product>;
    async fn create_category(&self, category: NewCategory) -> Result<Category>;
    /// Active categories by name.
    async fn categories(&self) -> Result<Vec<Category>>;
    /// Active category by slug.
    async fn category(&self, slug: &str) -> Result<Category>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn cart(&self, user_id: Uuid) -> Result<CartSummary>;
    async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartSummary>;
    /// Zero removes the line.
    async fn update_cart_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartSummary>;
    async fn remove_from_cart(&self, user_id: Uuid, product_id: Uuid) -> Result<CartSummary>;
    async fn clear_cart(&self, user_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    async fn create_coupon(&self, coupon: NewCoupon) -> Result<Coupon>;
    /// Coupons applicable right now, latest expiry first.
    async fn active_coupons(&self) -> Result<Vec<Coupon>>;
    /// Price `code` against the user's current cart without redeeming it.
    async fn preview_coupon(&self, user_id: Uuid, code: &str) -> Result<CouponPreview>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Convert the user's cart into an order in one atomic step.
    async fn checkout(&self, user_id: Uuid, request: CheckoutRequest) -> Result<OrderDetail>;
    async fn checkout_defaults(&self, user_id: Uuid) -> Result<CheckoutDefaults>;
    async fn order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail>;
    /// The user's orders, newest first.
    async fn order_history(&self, user_id: Uuid) -> Result<Vec<Order>>;
    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn initiate_payment(&self, user_id: Uuid, order_id: Uuid, method: PaymentMethod) -> Result<Payment>;
    async fn update_payment(&self, payment_id: Uuid, update: PaymentUpdate) -> Result<Payment>;
    async fn payments(&self, user_id: Uuid, order_id: Uuid) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create the user and its profile together.
    async fn create_account(&self, account: NewAccount) -> Result<Account>;
    async fn profile(&self, user_id: Uuid) -> Result<UserProfile>;
    async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<UserProfile>;
    async fn addresses(&self, user_id: Uuid) -> Result<Vec<ShippingAddress>>;
    async fn add_address(&self, user_id: Uuid, input: AddressInput) -> Result<ShippingAddress>;
    async fn update_address(&self, user_id: Uuid, address_id: Uuid, input: AddressInput) -> Result<ShippingAddress>;
    /// Flag one address as default and clear the flag on the user's others.
    async fn set_default_address(&self, user_id: Uuid, address_id: Uuid) -> Result<Vec<ShippingAddress>>;
    async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait EngagementRepository: Send + Sync {
    async fn wishlist(&self, user_id: Uuid) -> Result<Vec<WishlistItem>>;
    /// Returns false if the product was already on the wishlist.
    async fn add_to_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool>;
    async fn remove_from_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<()>;
    /// Add the product if absent, remove it if present. Returns whether it is now listed.
    async fn toggle_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool>;
    async fn submit_review(&self, user_id: Uuid, product_id: Uuid, input: ReviewInput) -> Result<Review>;
    async fn reviews(&self, product_id: Uuid) -> Result<Vec<Review>>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Sales and inventory snapshot for the back office.
    async fn dashboard(&self) -> Result<Dashboard>;
}

/// Everything the HTTP layer needs from a backend.
pub trait Store:
    CatalogRepository + CartRepository + CouponRepository + OrderRepository + PaymentRepository + AccountRepository
    + EngagementRepository + AnalyticsRepository
{
}

impl<T> Store for T where
    T: CatalogRepository + CartRepository + CouponRepository + OrderRepository + PaymentRepository + AccountRepository
        + EngagementRepository + AnalyticsRepository
{
}
