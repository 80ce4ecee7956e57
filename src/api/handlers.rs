//! HTTP handlers. Each one is a thin adapter over a store call, publishing a
//! domain event after state changes that other services care about.

use axum::{extract::{Path, Query, State}, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::domain::aggregates::{
    Account, AddressInput, CartSummary, Category, CategoryListing, CheckoutDefaults, Coupon, CouponPreview, NewAccount,
    NewCategory, NewCoupon, NewProduct, Order, OrderDetail, OrderStatus, Payment, PaymentMethod, PaymentState,
    PaymentUpdate, ProductView, ProfileUpdate, Review, ReviewInput, ShippingAddress, UserProfile, WishlistItem,
};
use crate::domain::analytics::Dashboard;
use crate::domain::checkout::CheckoutRequest;
use crate::domain::events::{DomainEvent, OrderEvent, PaymentEvent};
use crate::store::{
    AccountRepository, AnalyticsRepository, CartRepository, CatalogRepository, CouponRepository, EngagementRepository,
    OrderRepository, Page, PaymentRepository, ProductQuery, ProductSort,
};
use crate::ShopError;

type ApiResult<T> = Result<T, ShopError>;

#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    pub q: Option<String>,
    pub category: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub featured: Option<bool>,
    #[serde(default)]
    pub sort_by: ProductSort,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl From<CatalogParams> for ProductQuery {
    fn from(p: CatalogParams) -> Self {
        ProductQuery {
            search: p.q, category_id: p.category, min_price: p.min_price, max_price: p.max_price, featured: p.featured,
            sort: p.sort_by, page: Page::new(p.page, p.per_page),
        }
    }
}

#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub page: u32, pub per_page: u32 }

// ---- catalog ----

pub async fn list_products(State(s): State<AppState>, Query(p): Query<CatalogParams>) -> ApiResult<Json<PaginatedResponse<ProductView>>> {
    let query = ProductQuery::from(p);
    let data = s.store.list_products(&query).await?.into_iter().map(ProductView::from).collect();
    Ok(Json(PaginatedResponse { data, page: query.page.page, per_page: query.page.per_page }))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ProductView>> {
    Ok(Json(s.store.product(id).await?.into()))
}

pub async fn create_product(State(s): State<AppState>, Json(r): Json<NewProduct>) -> ApiResult<(StatusCode, Json<ProductView>)> {
    Ok((StatusCode::CREATED, Json(s.store.create_product(r).await?.into())))
}

pub async fn list_categories(State(s): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(s.store.categories().await?))
}

pub async fn create_category(State(s): State<AppState>, Json(r): Json<NewCategory>) -> ApiResult<(StatusCode, Json<Category>)> {
    Ok((StatusCode::CREATED, Json(s.store.create_category(r).await?)))
}

/// A category with its active products; the usual catalog filters still apply.
pub async fn category_listing(
    State(s): State<AppState>,
    Path(slug): Path<String>,
    Query(p): Query<CatalogParams>,
) -> ApiResult<Json<CategoryListing>> {
    let category = s.store.category(&slug).await?;
    let query = ProductQuery { category_id: Some(category.id), ..ProductQuery::from(p) };
    let products = s.store.list_products(&query).await?.into_iter().map(ProductView::from).collect();
    Ok(Json(CategoryListing { category, products }))
}

#[derive(Debug, Deserialize)] pub struct StockRequest { pub stock: i32 }
#[derive(Debug, Deserialize)] pub struct ActiveRequest { pub active: bool }

pub async fn restock(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StockRequest>) -> ApiResult<Json<ProductView>> {
    Ok(Json(s.store.restock(id, r.stock).await?.into()))
}

pub async fn set_product_active(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ActiveRequest>) -> ApiResult<Json<ProductView>> {
    Ok(Json(s.store.set_product_active(id, r.active).await?.into()))
}

pub async fn product_reviews(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<Review>>> {
    Ok(Json(s.store.reviews(id).await?))
}

// ---- accounts ----

pub async fn create_account(State(s): State<AppState>, Json(r): Json<NewAccount>) -> ApiResult<(StatusCode, Json<Account>)> {
    Ok((StatusCode::CREATED, Json(s.store.create_account(r).await?)))
}

pub async fn get_profile(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<UserProfile>> {
    Ok(Json(s.store.profile(user_id).await?))
}

pub async fn update_profile(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<ProfileUpdate>) -> ApiResult<Json<UserProfile>> {
    Ok(Json(s.store.update_profile(user_id, r).await?))
}

pub async fn list_addresses(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<Vec<ShippingAddress>>> {
    Ok(Json(s.store.addresses(user_id).await?))
}

pub async fn add_address(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<AddressInput>) -> ApiResult<(StatusCode, Json<ShippingAddress>)> {
    Ok((StatusCode::CREATED, Json(s.store.add_address(user_id, r).await?)))
}

pub async fn update_address(
    State(s): State<AppState>,
    Path((user_id, address_id)): Path<(Uuid, Uuid)>,
    Json(r): Json<AddressInput>,
) -> ApiResult<Json<ShippingAddress>> {
    Ok(Json(s.store.update_address(user_id, address_id, r).await?))
}

pub async fn set_default_address(State(s): State<AppState>, Path((user_id, address_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Vec<ShippingAddress>>> {
    Ok(Json(s.store.set_default_address(user_id, address_id).await?))
}

pub async fn delete_address(State(s): State<AppState>, Path((user_id, address_id)): Path<(Uuid, Uuid)>) -> ApiResult<StatusCode> {
    s.store.delete_address(user_id, address_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- cart ----

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest { pub product_id: Uuid, #[serde(default = "one")] pub quantity: i32 }
#[derive(Debug, Deserialize)] pub struct QuantityRequest { pub quantity: i32 }

fn one() -> i32 { 1 }

pub async fn get_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.store.cart(user_id).await?))
}

pub async fn add_to_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<AddToCartRequest>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.store.add_to_cart(user_id, r.product_id, r.quantity).await?))
}

pub async fn update_cart_item(
    State(s): State<AppState>,
    Path((user_id, product_id)): Path<(Uuid, Uuid)>,
    Json(r): Json<QuantityRequest>,
) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.store.update_cart_item(user_id, product_id, r.quantity).await?))
}

pub async fn remove_from_cart(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.store.remove_from_cart(user_id, product_id).await?))
}

pub async fn clear_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.store.clear_cart(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- checkout and orders ----

pub async fn checkout_defaults(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<CheckoutDefaults>> {
    Ok(Json(s.store.checkout_defaults(user_id).await?))
}

pub async fn checkout(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<OrderDetail>)> {
    let detail = s.store.checkout(user_id, r).await?;
    s.events.publish(DomainEvent::order_placed(&detail.order, detail.lines.len())).await;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_orders(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.store.order_history(user_id).await?))
}

pub async fn get_order(State(s): State<AppState>, Path((user_id, order_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<OrderDetail>> {
    Ok(Json(s.store.order(user_id, order_id).await?))
}

#[derive(Debug, Deserialize)] pub struct StatusRequest { pub status: OrderStatus }

pub async fn update_order_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StatusRequest>) -> ApiResult<Json<Order>> {
    let order = s.store.update_order_status(id, r.status).await?;
    s.events.publish(DomainEvent::Order(OrderEvent::StatusChanged { order_id: order.id, status: order.status })).await;
    Ok(Json(order))
}

// ---- payments ----

#[derive(Debug, Deserialize)] pub struct PaymentRequest { pub payment_method: PaymentMethod }

pub async fn initiate_payment(
    State(s): State<AppState>,
    Path((user_id, order_id)): Path<(Uuid, Uuid)>,
    Json(r): Json<PaymentRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = s.store.initiate_payment(user_id, order_id, r.payment_method).await?;
    s.events.publish(DomainEvent::Payment(PaymentEvent::Initiated { payment_id: payment.id, order_id, amount: payment.amount })).await;
    if payment.status != PaymentState::Pending {
        s.events.publish(DomainEvent::from(&payment)).await;
    }
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_payments(State(s): State<AppState>, Path((user_id, order_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(s.store.payments(user_id, order_id).await?))
}

pub async fn update_payment(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<PaymentUpdate>) -> ApiResult<Json<Payment>> {
    let payment = s.store.update_payment(id, r).await?;
    s.events.publish(DomainEvent::from(&payment)).await;
    Ok(Json(payment))
}

// ---- coupons ----

pub async fn list_coupons(State(s): State<AppState>) -> ApiResult<Json<Vec<Coupon>>> {
    Ok(Json(s.store.active_coupons().await?))
}

pub async fn create_coupon(State(s): State<AppState>, Json(r): Json<NewCoupon>) -> ApiResult<(StatusCode, Json<Coupon>)> {
    Ok((StatusCode::CREATED, Json(s.store.create_coupon(r).await?)))
}

#[derive(Debug, Deserialize)] pub struct CouponRequest { pub code: String }

pub async fn preview_coupon(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<CouponRequest>) -> ApiResult<Json<CouponPreview>> {
    Ok(Json(s.store.preview_coupon(user_id, &r.code).await?))
}

// ---- wishlist and reviews ----

#[derive(Debug, Deserialize)] pub struct WishlistRequest { pub product_id: Uuid }

pub async fn get_wishlist(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<Vec<WishlistItem>>> {
    Ok(Json(s.store.wishlist(user_id).await?))
}

pub async fn add_to_wishlist(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<WishlistRequest>) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let added = s.store.add_to_wishlist(user_id, r.product_id).await?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(serde_json::json!({ "added": added }))))
}

pub async fn remove_from_wishlist(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>) -> ApiResult<StatusCode> {
    s.store.remove_from_wishlist(user_id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct WishlistToggle { pub action: &'static str, pub in_wishlist: bool, pub wishlist_count: usize }

pub async fn toggle_wishlist(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<WishlistToggle>> {
    let in_wishlist = s.store.toggle_wishlist(user_id, product_id).await?;
    let wishlist_count = s.store.wishlist(user_id).await?.len();
    Ok(Json(WishlistToggle { action: if in_wishlist { "added" } else { "removed" }, in_wishlist, wishlist_count }))
}

pub async fn submit_review(
    State(s): State<AppState>,
    Path((user_id, product_id)): Path<(Uuid, Uuid)>,
    Json(r): Json<ReviewInput>,
) -> ApiResult<Json<Review>> {
    Ok(Json(s.store.submit_review(user_id, product_id, r).await?))
}

// ---- back office ----

pub async fn dashboard(State(s): State<AppState>) -> ApiResult<Json<Dashboard>> {
    Ok(Json(s.store.dashboard().await?))
}
