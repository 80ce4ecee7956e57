//! In-memory store.
//!
//! All state sits behind one async mutex, so every repository call is a
//! single critical section. Mutating calls validate and stage their changes
//! on copies before writing anything back, which gives the same
//! all-or-nothing behaviour as the Postgres transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::aggregates::{
    account, Account, AddressInput, Cart, CartItem, CartSummary, Category, CheckoutDefaults, Coupon, CouponPreview,
    LineChange, NewAccount, NewCategory, NewCoupon, NewProduct, Order, OrderDetail, OrderLine, OrderStatus, Payment,
    PaymentMethod, PaymentUpdate, Product, ProfileUpdate, Review, ReviewInput, ShippingAddress, User, UserProfile,
    WishlistItem,
};
use crate::domain::analytics::{Dashboard, ReportWindow};
use crate::domain::checkout::{CheckoutPlan, CheckoutRequest, CheckoutSettings};
use crate::domain::value_objects::CouponCode;
use crate::store::{
    AccountRepository, AnalyticsRepository, CartRepository, CatalogRepository, CouponRepository, EngagementRepository,
    OrderRepository, PaymentRepository, ProductQuery,
};
use crate::{Result, ShopError};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, UserProfile>,
    address_books: HashMap<Uuid, Vec<ShippingAddress>>,
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    /// (product, quantity) per user, in the order lines were added.
    carts: HashMap<Uuid, Vec<(Uuid, i32)>>,
    coupons: HashMap<String, Coupon>,
    orders: Vec<Order>,
    order_lines: Vec<OrderLine>,
    payments: Vec<Payment>,
    wishlist: Vec<(Uuid, Uuid, DateTime<Utc>)>,
    reviews: Vec<Review>,
}

impl State {
    fn ensure_user(&self, user_id: Uuid) -> Result<()> {
        if self.users.contains_key(&user_id) { Ok(()) } else { Err(ShopError::UserNotFound) }
    }

    fn product(&self, id: Uuid) -> Result<&Product> { self.products.get(&id).ok_or(ShopError::ProductNotFound) }

    fn category_name(&self, product: &Product) -> Option<&str> {
        product.category_id.and_then(|id| self.categories.get(&id)).map(|c| c.name.as_str())
    }

    fn product_mut(&mut self, id: Uuid) -> Result<&mut Product> { self.products.get_mut(&id).ok_or(ShopError::ProductNotFound) }

    fn load_cart(&self, user_id: Uuid) -> Cart {
        let items = self.carts.get(&user_id).into_iter().flatten()
            .filter_map(|(product_id, quantity)| self.products.get(product_id).map(|p| CartItem { product: p.clone(), quantity: *quantity }))
            .collect();
        Cart::new(user_id, items)
    }

    fn apply_line(&mut self, user_id: Uuid, change: LineChange) {
        let lines = self.carts.entry(user_id).or_default();
        match change {
            LineChange::Upsert { product_id, quantity } => match lines.iter_mut().find(|(p, _)| *p == product_id) {
                Some(line) => line.1 = quantity,
                None => lines.push((product_id, quantity)),
            },
            LineChange::Remove { product_id } => lines.retain(|(p, _)| *p != product_id),
        }
    }

    fn coupon(&self, code: &str) -> Result<&Coupon> {
        let code = CouponCode::new(code).map_err(|e| ShopError::Validation(e.to_string()))?;
        self.coupons.get(code.as_str()).ok_or_else(|| ShopError::CouponNotFound(code.into_string()))
    }

    fn order_index(&self, user_id: Uuid, order_id: Uuid) -> Result<usize> {
        self.orders.iter().position(|o| o.id == order_id && o.user_id == user_id).ok_or(ShopError::OrderNotFound)
    }

    fn detail(&self, order: &Order) -> OrderDetail {
        let lines = self.order_lines.iter().filter(|l| l.order_id == order.id).cloned().collect();
        OrderDetail { order: order.clone(), lines }
    }

    fn address_book(&mut self, user_id: Uuid) -> &mut Vec<ShippingAddress> { self.address_books.entry(user_id).or_default() }
}

pub struct MemoryStore {
    state: Mutex<State>,
    settings: CheckoutSettings,
}

impl MemoryStore {
    pub fn new(settings: CheckoutSettings) -> Self { Self { state: Mutex::new(State::default()), settings } }
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new(CheckoutSettings::default()) }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let product = Product::create(product)?;
        let mut state = self.state.lock().await;
        if let Some(id) = product.category_id {
            if !state.categories.contains_key(&id) { return Err(ShopError::CategoryNotFound); }
        }
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn product(&self, id: Uuid) -> Result<Product> { self.state.lock().await.product(id).cloned() }

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        query.check()?;
        let state = self.state.lock().await;
        let mut products: Vec<_> = state.products.values().filter(|p| query.matches(p, state.category_name(p))).cloned().collect();
        products.sort_by(|a, b| query.compare(a, b));
        let skip = usize::try_from(query.page.offset()).unwrap_or(usize::MAX);
        Ok(products.into_iter().skip(skip).take(query.page.per_page as usize).collect())
    }

    async fn restock(&self, id: Uuid, stock: i32) -> Result<Product> {
        let mut state = self.state.lock().await;
        let product = state.product_mut(id)?;
        product.restock(stock)?;
        Ok(product.clone())
    }

    async fn set_product_active(&self, id: Uuid, active: bool) -> Result<Product> {
        let mut state = self.state.lock().await;
        let product = state.product_mut(id)?;
        product.set_active(active);
        Ok(product.clone())
    }

    async fn create_category(&self, category: NewCategory) -> Result<Category> {
        let category = Category::create(category)?;
        let mut state = self.state.lock().await;
        if state.categories.values().any(|c| c.slug == category.slug) {
            return Err(ShopError::Validation(format!("slug: {} already exists", category.slug)));
        }
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let state = self.state.lock().await;
        let mut categories: Vec<_> = state.categories.values().filter(|c| c.is_active).cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn category(&self, slug: &str) -> Result<Category> {
        let state = self.state.lock().await;
        state.categories.values().find(|c| c.slug == slug && c.is_active).cloned().ok_or(ShopError::CategoryNotFound)
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn cart(&self, user_id: Uuid) -> Result<CartSummary> { self.state.lock().await.load_cart(user_id).try_into() }

    async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartSummary> {
        let mut state = self.state.lock().await;
        state.ensure_user(user_id)?;
        let product = state.product(product_id)?.clone();
        let mut cart = state.load_cart(user_id);
        let change = cart.add_item(&product, quantity)?;
        let summary = CartSummary::try_from(cart)?;
        state.apply_line(user_id, change);
        Ok(summary)
    }

    async fn update_cart_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartSummary> {
        let mut state = self.state.lock().await;
        let mut cart = state.load_cart(user_id);
        let change = cart.update_quantity(product_id, quantity)?;
        let summary = CartSummary::try_from(cart)?;
        state.apply_line(user_id, change);
        Ok(summary)
    }

    async fn remove_from_cart(&self, user_id: Uuid, product_id: Uuid) -> Result<CartSummary> {
        let mut state = self.state.lock().await;
        let mut cart = state.load_cart(user_id);
        let change = cart.remove_item(product_id)?;
        let summary = CartSummary::try_from(cart)?;
        state.apply_line(user_id, change);
        Ok(summary)
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        self.state.lock().await.carts.remove(&user_id);
        Ok(())
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn create_coupon(&self, coupon: NewCoupon) -> Result<Coupon> {
        let coupon = Coupon::create(coupon)?;
        let mut state = self.state.lock().await;
        if state.coupons.contains_key(&coupon.code) {
            return Err(ShopError::Validation(format!("code: {} already exists", coupon.code)));
        }
        state.coupons.insert(coupon.code.clone(), coupon.clone());
        Ok(coupon)
    }

    async fn active_coupons(&self) -> Result<Vec<Coupon>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let mut coupons: Vec<_> = state.coupons.values().filter(|c| c.is_valid(now)).cloned().collect();
        coupons.sort_by(|a, b| b.valid_to.cmp(&a.valid_to));
        Ok(coupons)
    }

    async fn preview_coupon(&self, user_id: Uuid, code: &str) -> Result<CouponPreview> {
        let state = self.state.lock().await;
        let cart = state.load_cart(user_id);
        if cart.is_empty() { return Err(ShopError::EmptyCart); }
        state.coupon(code)?.preview(Utc::now(), cart.subtotal()?)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn checkout(&self, user_id: Uuid, request: CheckoutRequest) -> Result<OrderDetail> {
        let mut state = self.state.lock().await;
        state.ensure_user(user_id)?;
        let cart = state.load_cart(user_id);
        let coupon = match request.coupon_code.as_deref() {
            Some(code) => Some(state.coupon(code)?.clone()),
            None => None,
        };
        let mut plan = CheckoutPlan::build(&cart, coupon.as_ref(), &request, &self.settings, Utc::now())?;

        let mut attempts = 1;
        while state.orders.iter().any(|o| o.order_number == plan.order.order_number) {
            if attempts >= self.settings.order_number_attempts { return Err(ShopError::OrderNumberExhausted); }
            plan.renumber(&self.settings);
            attempts += 1;
        }

        let mut reserved = Vec::with_capacity(plan.lines.len());
        for (product_id, quantity) in plan.reservations() {
            let mut product = state.product(product_id)?.clone();
            product.remove_inventory(quantity)?;
            reserved.push(product);
        }
        let redeemed = match coupon {
            Some(mut coupon) => { coupon.record_use()?; Some(coupon) }
            None => None,
        };

        for product in reserved { state.products.insert(product.id, product); }
        if let Some(coupon) = redeemed { state.coupons.insert(coupon.code.clone(), coupon); }
        state.carts.remove(&user_id);
        state.orders.push(plan.order.clone());
        state.order_lines.extend(plan.lines.iter().cloned());

        tracing::info!(order_number = %plan.order.order_number, %user_id, total = %plan.order.total, lines = plan.lines.len(), "order placed");
        Ok(OrderDetail { order: plan.order, lines: plan.lines })
    }

    async fn checkout_defaults(&self, user_id: Uuid) -> Result<CheckoutDefaults> {
        let state = self.state.lock().await;
        state.ensure_user(user_id)?;
        let default_address = state.address_books.get(&user_id).and_then(|book| book.iter().find(|a| a.is_default));
        Ok(CheckoutDefaults::prefill(default_address, state.profiles.get(&user_id)))
    }

    async fn order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail> {
        let state = self.state.lock().await;
        let idx = state.order_index(user_id, order_id)?;
        Ok(state.detail(&state.orders[idx]))
    }

    async fn order_history(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state.orders.iter().filter(|o| o.user_id == user_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
        let mut state = self.state.lock().await;
        let order = state.orders.iter_mut().find(|o| o.id == order_id).ok_or(ShopError::OrderNotFound)?;
        order.transition(status)?;
        tracing::info!(order_number = %order.order_number, %status, "order status changed");
        Ok(order.clone())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn initiate_payment(&self, user_id: Uuid, order_id: Uuid, method: PaymentMethod) -> Result<Payment> {
        let mut state = self.state.lock().await;
        let idx = state.order_index(user_id, order_id)?;
        let mut order = state.orders[idx].clone();
        let payment = Payment::initiate(&order, method)?;
        order.payment_method = method;
        payment.settle(&mut order)?;
        state.orders[idx] = order;
        state.payments.push(payment.clone());
        Ok(payment)
    }

    async fn update_payment(&self, payment_id: Uuid, update: PaymentUpdate) -> Result<Payment> {
        let mut state = self.state.lock().await;
        let p_idx = state.payments.iter().position(|p| p.id == payment_id).ok_or(ShopError::PaymentNotFound)?;
        let mut payment = state.payments[p_idx].clone();
        payment.apply(update)?;
        let o_idx = state.orders.iter().position(|o| o.id == payment.order_id).ok_or(ShopError::OrderNotFound)?;
        let mut order = state.orders[o_idx].clone();
        payment.settle(&mut order)?;
        state.orders[o_idx] = order;
        state.payments[p_idx] = payment.clone();
        tracing::info!(%payment_id, status = %payment.status, "payment updated");
        Ok(payment)
    }

    async fn payments(&self, user_id: Uuid, order_id: Uuid) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        state.order_index(user_id, order_id)?;
        Ok(state.payments.iter().filter(|p| p.order_id == order_id).cloned().collect())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let account = Account::open(account)?;
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == account.user.username) {
            return Err(ShopError::DuplicateUser(account.user.username));
        }
        state.users.insert(account.user.id, account.user.clone());
        state.profiles.insert(account.user.id, account.profile.clone());
        Ok(account)
    }

    async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        self.state.lock().await.profiles.get(&user_id).cloned().ok_or(ShopError::UserNotFound)
    }

    async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<UserProfile> {
        let mut state = self.state.lock().await;
        let profile = state.profiles.get_mut(&user_id).ok_or(ShopError::UserNotFound)?;
        profile.apply(update)?;
        Ok(profile.clone())
    }

    async fn addresses(&self, user_id: Uuid) -> Result<Vec<ShippingAddress>> {
        Ok(self.state.lock().await.address_books.get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_address(&self, user_id: Uuid, input: AddressInput) -> Result<ShippingAddress> {
        let address = ShippingAddress::create(user_id, input)?;
        let mut state = self.state.lock().await;
        state.ensure_user(user_id)?;
        let book = state.address_book(user_id);
        book.push(address.clone());
        if address.is_default { account::assign_default(book, address.id)?; }
        Ok(address)
    }

    async fn update_address(&self, user_id: Uuid, address_id: Uuid, input: AddressInput) -> Result<ShippingAddress> {
        let mut state = self.state.lock().await;
        let book = state.address_book(user_id);
        let idx = book.iter().position(|a| a.id == address_id).ok_or(ShopError::AddressNotFound)?;
        let mut address = book[idx].clone();
        address.apply(input)?;
        book[idx] = address.clone();
        if address.is_default { account::assign_default(book, address_id)?; }
        Ok(address)
    }

    async fn set_default_address(&self, user_id: Uuid, address_id: Uuid) -> Result<Vec<ShippingAddress>> {
        let mut state = self.state.lock().await;
        let book = state.address_book(user_id);
        account::assign_default(book, address_id)?;
        Ok(book.clone())
    }

    async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let book = state.address_book(user_id);
        let before = book.len();
        book.retain(|a| a.id != address_id);
        if book.len() == before { return Err(ShopError::AddressNotFound); }
        Ok(())
    }
}

#[async_trait]
impl EngagementRepository for MemoryStore {
    async fn wishlist(&self, user_id: Uuid) -> Result<Vec<WishlistItem>> {
        let state = self.state.lock().await;
        Ok(state.wishlist.iter().filter(|(u, _, _)| *u == user_id)
            .filter_map(|(u, p, at)| state.products.get(p).map(|product| WishlistItem { user_id: *u, product_id: *p, product_name: product.name.clone(), added_at: *at }))
            .collect())
    }

    async fn add_to_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.ensure_user(user_id)?;
        state.product(product_id)?;
        if state.wishlist.iter().any(|(u, p, _)| *u == user_id && *p == product_id) { return Ok(false); }
        state.wishlist.push((user_id, product_id, Utc::now()));
        Ok(true)
    }

    async fn remove_from_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<()> {
        self.state.lock().await.wishlist.retain(|(u, p, _)| !(*u == user_id && *p == product_id));
        Ok(())
    }

    async fn toggle_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.ensure_user(user_id)?;
        state.product(product_id)?;
        match state.wishlist.iter().position(|(u, p, _)| *u == user_id && *p == product_id) {
            Some(i) => { state.wishlist.remove(i); Ok(false) }
            None => { state.wishlist.push((user_id, product_id, Utc::now())); Ok(true) }
        }
    }

    async fn submit_review(&self, user_id: Uuid, product_id: Uuid, input: ReviewInput) -> Result<Review> {
        let mut state = self.state.lock().await;
        state.product(product_id)?;
        let purchased = state.order_lines.iter().filter(|l| l.product_id == product_id)
            .any(|l| state.orders.iter().any(|o| o.id == l.order_id && o.user_id == user_id));
        if !purchased { return Err(ShopError::NotPurchased); }
        let existing = state.reviews.iter().position(|r| r.product_id == product_id && r.user_id == user_id);
        let review = Review::submit(existing.map(|i| state.reviews[i].clone()), product_id, user_id, input)?;
        match existing {
            Some(i) => state.reviews[i] = review.clone(),
            None => state.reviews.push(review.clone()),
        }
        Ok(review)
    }

    async fn reviews(&self, product_id: Uuid) -> Result<Vec<Review>> {
        let state = self.state.lock().await;
        let mut reviews: Vec<_> = state.reviews.iter().filter(|r| r.product_id == product_id).cloned().collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryStore {
    async fn dashboard(&self) -> Result<Dashboard> {
        let state = self.state.lock().await;
        let window = ReportWindow::at(Utc::now());
        Ok(Dashboard::tally(window, &state.orders, &state.order_lines, state.products.values(), state.users.values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{account::address_input, DiscountType, PaymentState, PaymentStatus};
    use crate::domain::checkout;
    use crate::store::{Page, ProductSort};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    async fn shopper(store: &MemoryStore, name: &str) -> Uuid {
        store.create_account(NewAccount { username: name.into(), email: format!("{name}@example.com") }).await.unwrap().user.id
    }

    async fn product(store: &MemoryStore, name: &str, price: i64, stock: i32) -> Product {
        store.create_product(NewProduct { name: name.into(), price: Decimal::new(price, 0), stock, ..Default::default() }).await.unwrap()
    }

    #[tokio::test]
    async fn test_checkout_converts_cart_into_order() {
        let store = MemoryStore::default();
        let user = shopper(&store, "rahim").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        let mug = product(&store, "Mug", 35, 10).await;
        store.add_to_cart(user, kettle.id, 2).await.unwrap();
        store.add_to_cart(user, mug.id, 1).await.unwrap();

        let detail = store.checkout(user, checkout::request()).await.unwrap();
        assert_eq!(detail.lines.len(), 2);
        assert_eq!(Order::lines_total(&detail.lines), detail.order.subtotal);
        assert_eq!(detail.order.subtotal, Decimal::new(935, 0));
        assert_eq!(detail.order.shipping_cost, Decimal::new(60, 0));
        assert_eq!(detail.order.total, Decimal::new(995, 0));

        assert!(store.cart(user).await.unwrap().items.is_empty());
        assert_eq!(store.product(kettle.id).await.unwrap().stock, 3);
        assert_eq!(store.order_history(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_lines_survive_price_change() {
        let store = MemoryStore::default();
        let user = shopper(&store, "karim").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        let detail = store.checkout(user, checkout::request()).await.unwrap();

        store.state.lock().await.products.get_mut(&kettle.id).unwrap().price = Decimal::new(999, 0);
        let reloaded = store.order(user, detail.order.id).await.unwrap();
        assert_eq!(reloaded.lines[0].price, Decimal::new(450, 0));
    }

    #[tokio::test]
    async fn test_empty_cart_checkout_creates_nothing() {
        let store = MemoryStore::default();
        let user = shopper(&store, "empty").await;
        assert!(matches!(store.checkout(user, checkout::request()).await, Err(ShopError::EmptyCart)));
        assert!(store.order_history(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_checkout_leaves_cart_untouched() {
        let store = MemoryStore::default();
        let user = shopper(&store, "late").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        let mug = product(&store, "Mug", 35, 10).await;
        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        store.add_to_cart(user, mug.id, 4).await.unwrap();
        store.restock(mug.id, 2).await.unwrap();

        let err = store.checkout(user, checkout::request()).await.unwrap_err();
        assert!(matches!(err, ShopError::StockUnavailable { ref product, .. } if product == "Mug"));
        assert_eq!(store.cart(user).await.unwrap().item_count, 2);
        assert_eq!(store.product(kettle.id).await.unwrap().stock, 5);
        assert!(store.order_history(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_never_oversell() {
        let store = Arc::new(MemoryStore::default());
        let lamp = product(&store, "Lamp", 1200, 3).await;
        let mut users = Vec::new();
        for i in 0..6 {
            let user = shopper(&store, &format!("buyer{i}")).await;
            store.add_to_cart(user, lamp.id, 1).await.unwrap();
            users.push(user);
        }

        let handles: Vec<_> = users.into_iter().map(|user| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.checkout(user, checkout::request()).await })
        }).collect();
        let mut sold = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(detail) => sold += detail.lines.iter().map(|l| l.quantity).sum::<i32>(),
                Err(e) => assert!(matches!(e, ShopError::StockUnavailable { .. })),
            }
        }
        assert_eq!(sold, 3);
        assert_eq!(store.product(lamp.id).await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_coupon_redeemed_once_per_checkout() {
        let store = MemoryStore::default();
        let user = shopper(&store, "saver").await;
        let kettle = product(&store, "Kettle", 1500, 5).await;
        store.create_coupon(NewCoupon {
            code: "eid25".into(), discount_type: DiscountType::Percentage, discount_value: Decimal::new(25, 0),
            min_purchase: Decimal::new(1000, 0), max_discount: Some(Decimal::new(300, 0)), valid_from: None,
            valid_to: Utc::now() + Duration::days(7), usage_limit: Some(1),
        }).await.unwrap();
        store.add_to_cart(user, kettle.id, 1).await.unwrap();

        let preview = store.preview_coupon(user, "EID25").await.unwrap();
        assert_eq!(preview.discount, Decimal::new(300, 0));

        let mut request = checkout::request();
        request.coupon_code = Some("eid25".into());
        let detail = store.checkout(user, request.clone()).await.unwrap();
        assert_eq!(detail.order.discount, Decimal::new(300, 0));
        assert_eq!(detail.order.total, Decimal::new(1200, 0));
        assert!(store.active_coupons().await.unwrap().is_empty());

        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        let err = store.checkout(user, request).await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidCoupon { .. }));
        assert_eq!(store.cart(user).await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_coupon() {
        let store = MemoryStore::default();
        let user = shopper(&store, "guess").await;
        let kettle = product(&store, "Kettle", 100, 5).await;
        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        let mut request = checkout::request();
        request.coupon_code = Some("NOPE".into());
        assert!(matches!(store.checkout(user, request).await, Err(ShopError::CouponNotFound(code)) if code == "NOPE"));
    }

    #[tokio::test]
    async fn test_order_number_exhaustion() {
        let settings = CheckoutSettings { order_number_length: 1, order_number_attempts: 1, ..Default::default() };
        let store = MemoryStore::new(settings);
        let user = shopper(&store, "unlucky").await;
        let kettle = product(&store, "Kettle", 100, 100).await;
        let mut placed = 0;
        let mut exhausted = false;
        for _ in 0..64 {
            store.add_to_cart(user, kettle.id, 1).await.unwrap();
            match store.checkout(user, checkout::request()).await {
                Ok(_) => placed += 1,
                Err(ShopError::OrderNumberExhausted) => { exhausted = true; break; }
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert!(exhausted);
        assert!(placed <= 32);
    }

    #[tokio::test]
    async fn test_default_address_is_exclusive() {
        let store = MemoryStore::default();
        let user = shopper(&store, "mover").await;
        let home = store.add_address(user, address_input("Dhaka", true)).await.unwrap();
        let office = store.add_address(user, address_input("Gazipur", true)).await.unwrap();
        let book = store.addresses(user).await.unwrap();
        assert_eq!(book.iter().filter(|a| a.is_default).map(|a| a.id).collect::<Vec<_>>(), vec![office.id]);

        let book = store.set_default_address(user, home.id).await.unwrap();
        assert_eq!(book.iter().filter(|a| a.is_default).map(|a| a.id).collect::<Vec<_>>(), vec![home.id]);
        assert_eq!(store.checkout_defaults(user).await.unwrap().shipping_city.as_deref(), Some("Dhaka"));

        let other = shopper(&store, "neighbour").await;
        let theirs = store.add_address(other, address_input("Rajshahi", true)).await.unwrap();
        store.set_default_address(user, office.id).await.unwrap();
        assert!(store.addresses(other).await.unwrap().iter().any(|a| a.id == theirs.id && a.is_default));
        assert!(matches!(store.set_default_address(user, theirs.id).await, Err(ShopError::AddressNotFound)));
    }

    #[tokio::test]
    async fn test_cash_on_delivery_marks_order_paid() {
        let store = MemoryStore::default();
        let user = shopper(&store, "cod").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        let detail = store.checkout(user, checkout::request()).await.unwrap();

        let payment = store.initiate_payment(user, detail.order.id, PaymentMethod::Cod).await.unwrap();
        assert_eq!(payment.status, PaymentState::Completed);
        assert_eq!(store.order(user, detail.order.id).await.unwrap().order.payment_status, PaymentStatus::Paid);
        assert!(matches!(store.initiate_payment(user, detail.order.id, PaymentMethod::Bkash).await, Err(ShopError::AlreadyPaid)));
    }

    #[tokio::test]
    async fn test_gateway_callback_settles_order() {
        let store = MemoryStore::default();
        let user = shopper(&store, "card").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        let detail = store.checkout(user, checkout::request()).await.unwrap();

        let payment = store.initiate_payment(user, detail.order.id, PaymentMethod::Card).await.unwrap();
        assert_eq!(payment.status, PaymentState::Pending);
        let update = PaymentUpdate { status: PaymentState::Completed, transaction_id: Some("SSL42".into()), details: None };
        store.update_payment(payment.id, update).await.unwrap();
        let order = store.order(user, detail.order.id).await.unwrap().order;
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.payment_method, PaymentMethod::Card);
        assert_eq!(store.payments(user, detail.order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_review_requires_purchase() {
        let store = MemoryStore::default();
        let user = shopper(&store, "critic").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        let input = ReviewInput { rating: 5, comment: "Boils fast".into() };
        assert!(matches!(store.submit_review(user, kettle.id, input.clone()).await, Err(ShopError::NotPurchased)));

        store.add_to_cart(user, kettle.id, 1).await.unwrap();
        store.checkout(user, checkout::request()).await.unwrap();
        store.submit_review(user, kettle.id, input).await.unwrap();
        store.submit_review(user, kettle.id, ReviewInput { rating: 3, comment: "Lid broke".into() }).await.unwrap();
        let reviews = store.reviews(kettle.id).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].rating, 3);
    }

    #[tokio::test]
    async fn test_wishlist_is_idempotent() {
        let store = MemoryStore::default();
        let user = shopper(&store, "dreamer").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        assert!(store.add_to_wishlist(user, kettle.id).await.unwrap());
        assert!(!store.add_to_wishlist(user, kettle.id).await.unwrap());
        assert_eq!(store.wishlist(user).await.unwrap()[0].product_name, "Kettle");
        store.remove_from_wishlist(user, kettle.id).await.unwrap();
        assert!(store.wishlist(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_search_filters_and_sorts() {
        let store = MemoryStore::default();
        let kitchen = store.create_category(NewCategory { name: "Kitchen".into(), description: None, icon: None }).await.unwrap();
        let clothing = store.create_category(NewCategory { name: "Clothing".into(), description: None, icon: Some("shirt".into()) }).await.unwrap();
        let new = |name: &str, price: i64, category: &Category, featured: bool| NewProduct {
            category_id: Some(category.id), name: name.into(), price: Decimal::new(price, 0), stock: 5, is_featured: featured,
            ..Default::default()
        };
        let kettle = store.create_product(new("Electric Kettle", 1800, &kitchen, true)).await.unwrap();
        let pan = store.create_product(new("Frying Pan", 950, &kitchen, false)).await.unwrap();
        let saree = store.create_product(new("Jamdani Saree", 4500, &clothing, false)).await.unwrap();
        let ids = |products: Vec<Product>| products.into_iter().map(|p| p.id).collect::<Vec<_>>();

        let by_category = ProductQuery { category_id: Some(kitchen.id), sort: ProductSort::PriceLow, ..Default::default() };
        assert_eq!(ids(store.list_products(&by_category).await.unwrap()), vec![pan.id, kettle.id]);

        let by_category_name = ProductQuery { search: Some("kitch".into()), ..Default::default() };
        assert_eq!(store.list_products(&by_category_name).await.unwrap().len(), 2);

        let priced = ProductQuery { min_price: Some(Decimal::new(1000, 0)), sort: ProductSort::PriceHigh, ..Default::default() };
        assert_eq!(ids(store.list_products(&priced).await.unwrap()), vec![saree.id, kettle.id]);

        let featured = ProductQuery { featured: Some(true), ..Default::default() };
        assert_eq!(ids(store.list_products(&featured).await.unwrap()), vec![kettle.id]);

        store.set_product_active(saree.id, false).await.unwrap();
        let by_name = ProductQuery { sort: ProductSort::Name, ..Default::default() };
        assert_eq!(ids(store.list_products(&by_name).await.unwrap()), vec![kettle.id, pan.id]);

        let far = ProductQuery { page: Page::new(Some(u32::MAX), Some(100)), ..Default::default() };
        assert!(store.list_products(&far).await.unwrap().is_empty());

        let names: Vec<_> = store.categories().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Clothing", "Kitchen"]);
        assert_eq!(store.category("kitchen").await.unwrap().id, kitchen.id);
        assert!(matches!(store.category("garden").await, Err(ShopError::CategoryNotFound)));
    }

    #[tokio::test]
    async fn test_product_needs_known_category() {
        let store = MemoryStore::default();
        let orphan = NewProduct { category_id: Some(Uuid::now_v7()), name: "Lamp".into(), price: Decimal::ONE, stock: 1, ..Default::default() };
        assert!(matches!(store.create_product(orphan).await, Err(ShopError::CategoryNotFound)));
        store.create_category(NewCategory { name: "Lighting".into(), description: None, icon: None }).await.unwrap();
        let again = store.create_category(NewCategory { name: "lighting".into(), description: None, icon: None }).await;
        assert!(matches!(again, Err(ShopError::Validation(_))));
    }

    #[tokio::test]
    async fn test_oversized_price_never_reaches_cart() {
        let store = MemoryStore::default();
        let user = shopper(&store, "whale").await;
        let huge = NewProduct { name: "Yacht".into(), price: Decimal::MAX, stock: 5, ..Default::default() };
        assert!(matches!(store.create_product(huge).await, Err(ShopError::Validation(_))));

        let yacht = product(&store, "Yacht", 1, 5).await;
        store.state.lock().await.products.get_mut(&yacht.id).unwrap().price = Decimal::MAX;
        assert!(matches!(store.add_to_cart(user, yacht.id, 2).await, Err(ShopError::AmountOutOfRange)));
        assert!(store.state.lock().await.carts.get(&user).map_or(true, Vec::is_empty));
    }

    #[tokio::test]
    async fn test_wishlist_toggle() {
        let store = MemoryStore::default();
        let user = shopper(&store, "fickle").await;
        let kettle = product(&store, "Kettle", 450, 5).await;
        assert!(store.toggle_wishlist(user, kettle.id).await.unwrap());
        assert_eq!(store.wishlist(user).await.unwrap().len(), 1);
        assert!(!store.toggle_wishlist(user, kettle.id).await.unwrap());
        assert!(store.wishlist(user).await.unwrap().is_empty());
        assert!(matches!(store.toggle_wishlist(user, Uuid::now_v7()).await, Err(ShopError::ProductNotFound)));
    }

    #[tokio::test]
    async fn test_dashboard_figures() {
        let store = MemoryStore::default();
        let kettle = product(&store, "Kettle", 500, 12).await;
        let mug = product(&store, "Mug", 100, 30).await;
        let first = shopper(&store, "first").await;
        let second = shopper(&store, "second").await;

        store.add_to_cart(first, kettle.id, 3).await.unwrap();
        let paid = store.checkout(first, checkout::request()).await.unwrap();
        store.initiate_payment(first, paid.order.id, PaymentMethod::Cod).await.unwrap();
        store.add_to_cart(second, mug.id, 5).await.unwrap();
        store.add_to_cart(second, kettle.id, 1).await.unwrap();
        let unpaid = store.checkout(second, checkout::request()).await.unwrap();
        store.update_order_status(unpaid.order.id, OrderStatus::Processing).await.unwrap();

        let dash = store.dashboard().await.unwrap();
        assert_eq!(dash.sales.total_orders, 2);
        assert_eq!(dash.sales.pending_orders, 1);
        assert_eq!(dash.sales.today_orders, 2);
        assert_eq!(dash.sales.weekly_orders, 2);
        assert_eq!(dash.sales.total_revenue, paid.order.total + unpaid.order.total);
        assert_eq!(dash.sales.weekly_revenue, paid.order.total);
        assert_eq!(dash.total_users, 2);
        assert_eq!(dash.new_users_week, 2);
        assert_eq!(dash.top_products.iter().map(|t| (t.name.as_str(), t.units_sold)).collect::<Vec<_>>(), vec![("Mug", 5), ("Kettle", 4)]);
        assert_eq!(dash.low_stock.iter().map(|a| (a.name.as_str(), a.stock)).collect::<Vec<_>>(), vec![("Kettle", 8)]);
        assert_eq!(dash.recent_orders.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = MemoryStore::default();
        shopper(&store, "same").await;
        let again = store.create_account(NewAccount { username: "same".into(), email: "other@example.com".into() }).await;
        assert!(matches!(again, Err(ShopError::DuplicateUser(_))));
    }
}
