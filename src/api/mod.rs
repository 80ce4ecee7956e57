//! JSON API

pub mod handlers;

use axum::{http::StatusCode, response::{IntoResponse, Response}, routing::{get, post, put}, Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::domain::events::EventPublisher;
use crate::store::Store;
use crate::ShopError;
use handlers::*;

#[derive(Clone)]
pub struct AppState { pub store: Arc<dyn Store>, pub events: EventPublisher }

impl ShopError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProductNotFound | Self::CategoryNotFound | Self::OrderNotFound | Self::PaymentNotFound | Self::AddressNotFound
            | Self::UserNotFound | Self::CartItemNotFound | Self::CouponNotFound(_) => StatusCode::NOT_FOUND,
            Self::EmptyCart | Self::InvalidQuantity | Self::AmountOutOfRange | Self::InvalidCoupon { .. } | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::StockUnavailable { .. } | Self::InvalidStatusTransition { .. } | Self::AlreadyPaid | Self::DuplicateUser(_) => StatusCode::CONFLICT,
            Self::NotPurchased => StatusCode::FORBIDDEN,
            Self::OrderNumberExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                serde_json::json!({ "error": "internal error" })
            }
            Self::StockUnavailable { product_id, available, .. } => {
                serde_json::json!({ "error": self.to_string(), "product_id": product_id, "available": available })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "bdshop"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/products/:id/stock", put(restock))
        .route("/api/v1/products/:id/active", put(set_product_active))
        .route("/api/v1/products/:id/reviews", get(product_reviews))
        .route("/api/v1/categories", get(list_categories).post(create_category))
        .route("/api/v1/categories/:slug", get(category_listing))
        .route("/api/v1/accounts", post(create_account))
        .route("/api/v1/users/:user_id/profile", get(get_profile).put(update_profile))
        .route("/api/v1/users/:user_id/addresses", get(list_addresses).post(add_address))
        .route("/api/v1/users/:user_id/addresses/:address_id", put(update_address).delete(delete_address))
        .route("/api/v1/users/:user_id/addresses/:address_id/default", post(set_default_address))
        .route("/api/v1/users/:user_id/cart", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/users/:user_id/cart/:product_id", put(update_cart_item).delete(remove_from_cart))
        .route("/api/v1/users/:user_id/checkout", get(checkout_defaults).post(checkout))
        .route("/api/v1/users/:user_id/orders", get(list_orders))
        .route("/api/v1/users/:user_id/orders/:order_id", get(get_order))
        .route("/api/v1/users/:user_id/orders/:order_id/payments", get(list_payments).post(initiate_payment))
        .route("/api/v1/users/:user_id/coupons/preview", post(preview_coupon))
        .route("/api/v1/users/:user_id/wishlist", get(get_wishlist).post(add_to_wishlist))
        .route("/api/v1/users/:user_id/wishlist/:product_id", axum::routing::delete(remove_from_wishlist))
        .route("/api/v1/users/:user_id/wishlist/:product_id/toggle", post(toggle_wishlist))
        .route("/api/v1/users/:user_id/reviews/:product_id", post(submit_review))
        .route("/api/v1/orders/:id/status", put(update_order_status))
        .route("/api/v1/payments/:id", put(update_payment))
        .route("/api/v1/coupons", get(list_coupons).post(create_coupon))
        .route("/api/v1/analytics", get(dashboard))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        app(AppState { store: Arc::new(MemoryStore::default()), events: EventPublisher::default() })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    fn money(v: &Value) -> Decimal { v.as_str().unwrap().parse().unwrap() }

    fn shipping_form() -> Value {
        json!({
            "shipping_address": "House 7, Road 3, Dhanmondi",
            "shipping_city": "Dhaka",
            "shipping_postal_code": "1209",
            "shipping_phone": "01711000000"
        })
    }

    async fn seed(app: &Router, stock: i32) -> (String, String) {
        let (status, account) = send(app, Method::POST, "/api/v1/accounts", Some(json!({"username": "rahim", "email": "rahim@example.com"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, product) = send(app, Method::POST, "/api/v1/products", Some(json!({"name": "Jamdani Saree", "price": "450", "stock": stock}))).await;
        assert_eq!(status, StatusCode::CREATED);
        (account["user"]["id"].as_str().unwrap().to_string(), product["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&router(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_checkout_flow() {
        let app = router();
        let (user, product) = seed(&app, 3).await;
        let (status, cart) = send(&app, Method::POST, &format!("/api/v1/users/{user}/cart"), Some(json!({"product_id": product, "quantity": 2}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["total_items"], 2);

        let (status, order) = send(&app, Method::POST, &format!("/api/v1/users/{user}/checkout"), Some(shipping_form())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["order_number"].as_str().unwrap().len(), 12);
        assert_eq!(order["lines"].as_array().unwrap().len(), 1);
        assert_eq!(money(&order["subtotal"]), Decimal::new(900, 0));
        assert_eq!(money(&order["shipping_cost"]), Decimal::new(60, 0));
        assert_eq!(money(&order["total"]), Decimal::new(960, 0));

        let (_, cart) = send(&app, Method::GET, &format!("/api/v1/users/{user}/cart"), None).await;
        assert!(cart["items"].as_array().unwrap().is_empty());
        let (_, stock) = send(&app, Method::GET, &format!("/api/v1/products/{product}"), None).await;
        assert_eq!(stock["stock"], 1);

        let (status, history) = send(&app, Method::GET, &format!("/api/v1/users/{user}/orders"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart_checkout_rejected() {
        let app = router();
        let (user, _) = seed(&app, 3).await;
        let (status, body) = send(&app, Method::POST, &format!("/api/v1/users/{user}/checkout"), Some(shipping_form())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Your cart is empty");
        let (_, history) = send(&app, Method::GET, &format!("/api/v1/users/{user}/orders"), None).await;
        assert!(history.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stock_conflict_reports_availability() {
        let app = router();
        let (user, product) = seed(&app, 1).await;
        let (status, body) = send(&app, Method::POST, &format!("/api/v1/users/{user}/cart"), Some(json!({"product_id": product, "quantity": 2}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["available"], 1);
    }

    #[tokio::test]
    async fn test_status_transitions_and_cod_payment() {
        let app = router();
        let (user, product) = seed(&app, 3).await;
        send(&app, Method::POST, &format!("/api/v1/users/{user}/cart"), Some(json!({"product_id": product}))).await;
        let (_, order) = send(&app, Method::POST, &format!("/api/v1/users/{user}/checkout"), Some(shipping_form())).await;
        let order_id = order["id"].as_str().unwrap();

        let (status, _) = send(&app, Method::PUT, &format!("/api/v1/orders/{order_id}/status"), Some(json!({"status": "shipped"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, body) = send(&app, Method::PUT, &format!("/api/v1/orders/{order_id}/status"), Some(json!({"status": "processing"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processing");

        let uri = format!("/api/v1/users/{user}/orders/{order_id}/payments");
        let (status, payment) = send(&app, Method::POST, &uri, Some(json!({"payment_method": "cod"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payment["status"], "completed");
        let (status, _) = send(&app, Method::POST, &uri, Some(json!({"payment_method": "bkash"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (_, detail) = send(&app, Method::GET, &format!("/api/v1/users/{user}/orders/{order_id}"), None).await;
        assert_eq!(detail["payment_status"], "paid");
    }

    #[tokio::test]
    async fn test_unknown_resources_are_404() {
        let app = router();
        let (user, _) = seed(&app, 1).await;
        let missing = uuid::Uuid::now_v7();
        let (status, _) = send(&app, Method::GET, &format!("/api/v1/products/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, &format!("/api/v1/users/{user}/orders/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_default_address_switch() {
        let app = router();
        let (user, _) = seed(&app, 1).await;
        let uri = format!("/api/v1/users/{user}/addresses");
        let address = |city: &str, is_default: bool| json!({
            "full_name": "Rahim Uddin", "phone": "01711000000", "address": "Road 3", "city": city,
            "postal_code": "1209", "is_default": is_default
        });
        let (_, first) = send(&app, Method::POST, &uri, Some(address("Dhaka", true))).await;
        let (status, _) = send(&app, Method::POST, &uri, Some(address("Sylhet", true))).await;
        assert_eq!(status, StatusCode::CREATED);
        let first_id = first["id"].as_str().unwrap();
        let (status, book) = send(&app, Method::POST, &format!("{uri}/{first_id}/default"), None).await;
        assert_eq!(status, StatusCode::OK);
        let defaults: Vec<&Value> = book.as_array().unwrap().iter().filter(|a| a["is_default"] == true).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0]["id"], first["id"]);

        let (_, prefill) = send(&app, Method::GET, &format!("/api/v1/users/{user}/checkout"), None).await;
        assert_eq!(prefill["shipping_city"], "Dhaka");
    }

    #[tokio::test]
    async fn test_catalog_search_and_categories() {
        let app = router();
        let (status, textiles) = send(&app, Method::POST, "/api/v1/categories", Some(json!({"name": "Textiles"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(textiles["slug"], "textiles");
        let category = textiles["id"].as_str().unwrap();
        for (name, price, featured) in [("Nakshi Kantha", "2200", true), ("Gamcha", "180", false)] {
            let body = json!({"name": name, "price": price, "stock": 4, "category_id": category, "is_featured": featured});
            let (status, _) = send(&app, Method::POST, "/api/v1/products", Some(body)).await;
            assert_eq!(status, StatusCode::CREATED);
        }
        send(&app, Method::POST, "/api/v1/products", Some(json!({"name": "Clay Pot", "price": "90", "stock": 0, "old_price": "120"}))).await;

        let (status, page) = send(&app, Method::GET, "/api/v1/products?q=TEXTILE&sort_by=price_low", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = page["data"].as_array().unwrap().iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Gamcha", "Nakshi Kantha"]);

        let (_, page) = send(&app, Method::GET, "/api/v1/products?min_price=100&max_price=500", None).await;
        assert_eq!(page["data"].as_array().unwrap().len(), 1);
        assert_eq!(page["data"][0]["name"], "Gamcha");

        let (_, page) = send(&app, Method::GET, "/api/v1/products?featured=true", None).await;
        assert_eq!(page["data"][0]["name"], "Nakshi Kantha");

        let (_, page) = send(&app, Method::GET, "/api/v1/products?q=clay", None).await;
        assert_eq!(page["data"][0]["in_stock"], false);
        assert_eq!(page["data"][0]["discount_percentage"], "25");

        let (status, _) = send(&app, Method::GET, "/api/v1/products?min_price=500&max_price=100", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, page) = send(&app, Method::GET, &format!("/api/v1/products?page={}&per_page=100", u32::MAX), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page["data"].as_array().unwrap().is_empty());

        let (status, listing) = send(&app, Method::GET, "/api/v1/categories/textiles?sort_by=name", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["category"]["name"], "Textiles");
        assert_eq!(listing["products"].as_array().unwrap().len(), 2);
        assert_eq!(listing["products"][0]["name"], "Gamcha");
        let (status, _) = send(&app, Method::GET, "/api/v1/categories/pottery", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, all) = send(&app, Method::GET, "/api/v1/categories", None).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_price_rejected() {
        let app = router();
        let body = json!({"name": "Jet", "price": Decimal::MAX.to_string(), "stock": 2});
        let (status, _) = send(&app, Method::POST, "/api/v1/products", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wishlist_toggle_route() {
        let app = router();
        let (user, product) = seed(&app, 2).await;
        let uri = format!("/api/v1/users/{user}/wishlist/{product}/toggle");
        let (status, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"action": "added", "in_wishlist": true, "wishlist_count": 1}));
        let (_, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(body, json!({"action": "removed", "in_wishlist": false, "wishlist_count": 0}));
        let missing = uuid::Uuid::now_v7();
        let (status, _) = send(&app, Method::POST, &format!("/api/v1/users/{user}/wishlist/{missing}/toggle"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_analytics_dashboard() {
        let app = router();
        let (user, product) = seed(&app, 12).await;
        send(&app, Method::POST, &format!("/api/v1/users/{user}/cart"), Some(json!({"product_id": product, "quantity": 3}))).await;
        let (status, _) = send(&app, Method::POST, &format!("/api/v1/users/{user}/checkout"), Some(shipping_form())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, dash) = send(&app, Method::GET, "/api/v1/analytics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dash["total_orders"], 1);
        assert_eq!(dash["pending_orders"], 1);
        assert_eq!(money(&dash["total_revenue"]), Decimal::new(1350, 0));
        assert_eq!(money(&dash["weekly_revenue"]), Decimal::ZERO);
        assert_eq!(dash["total_users"], 1);
        assert_eq!(dash["top_products"][0]["units_sold"], 3);
        assert_eq!(dash["low_stock"][0]["stock"], 9);
        assert_eq!(dash["recent_orders"].as_array().unwrap().len(), 1);
    }
}
