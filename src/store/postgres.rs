//! Postgres store.
//!
//! Mutating calls run in one transaction and lock the rows they read before
//! deciding anything. Checkout locks the user's cart lines together with
//! their products (in product-id order, so concurrent checkouts sharing
//! products queue instead of deadlocking) and the coupon row, then writes
//! the order, its lines, the stock decrements, the coupon redemption and the
//! cart deletion before committing. Any error drops the transaction, which
//! rolls everything back.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::aggregates::{
    account, Account, AddressInput, Cart, CartItem, CartSummary, Category, CheckoutDefaults, Coupon, CouponPreview,
    LineChange, NewAccount, NewCategory, NewCoupon, NewProduct, Order, OrderDetail, OrderLine, OrderStatus, Payment,
    PaymentMethod, PaymentUpdate, Product, ProfileUpdate, Review, ReviewInput, ShippingAddress, UserProfile,
    WishlistItem,
};
use crate::domain::analytics::{Dashboard, ReportWindow, SalesSummary, StockAlert, TopProduct, DASHBOARD_ROWS, LOW_STOCK_THRESHOLD};
use crate::domain::checkout::{CheckoutPlan, CheckoutRequest, CheckoutSettings};
use crate::domain::value_objects::CouponCode;
use crate::store::{
    AccountRepository, AnalyticsRepository, CartRepository, CatalogRepository, CouponRepository, EngagementRepository,
    OrderRepository, PaymentRepository, ProductQuery, ProductSort,
};
use crate::{Result, ShopError};

const CART_SQL: &str = "SELECT p.*, ci.quantity FROM cart_items ci JOIN products p ON p.id = ci.product_id \
     WHERE ci.user_id = $1 ORDER BY ci.created_at, p.id";
const CART_FOR_CHECKOUT_SQL: &str = "SELECT p.*, ci.quantity FROM cart_items ci JOIN products p ON p.id = ci.product_id \
     WHERE ci.user_id = $1 ORDER BY p.id FOR UPDATE";
const PRODUCT_SEARCH_SQL: &str = "SELECT p.* FROM products p LEFT JOIN categories c ON c.id = p.category_id \
     WHERE p.is_active \
       AND ($1::text IS NULL OR p.name ILIKE $1 OR p.description ILIKE $1 OR c.name ILIKE $1) \
       AND ($2::uuid IS NULL OR p.category_id = $2) \
       AND ($3::numeric IS NULL OR p.price >= $3) \
       AND ($4::numeric IS NULL OR p.price <= $4) \
       AND ($5::boolean IS NULL OR p.is_featured = $5)";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    settings: CheckoutSettings,
}

impl PgStore {
    pub fn new(pool: PgPool, settings: CheckoutSettings) -> Self { Self { pool, settings } }

    /// Apply pending migrations from `./migrations`.
    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// `ILIKE` pattern matching `term` anywhere, with its wildcards taken literally.
fn contains_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

fn order_clause(sort: ProductSort) -> &'static str {
    match sort {
        ProductSort::Newest => "p.created_at DESC, p.id DESC",
        ProductSort::PriceLow => "p.price ASC, p.id",
        ProductSort::PriceHigh => "p.price DESC, p.id",
        ProductSort::Name => "p.name ASC, p.id",
    }
}

async fn lock_user(conn: &mut PgConnection, user_id: Uuid) -> Result<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id).fetch_optional(conn).await?.ok_or(ShopError::UserNotFound)?;
    Ok(())
}

async fn user_exists(conn: &mut PgConnection, user_id: Uuid) -> Result<()> {
    let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)").bind(user_id).fetch_one(conn).await?;
    if found { Ok(()) } else { Err(ShopError::UserNotFound) }
}

async fn find_product(conn: &mut PgConnection, id: Uuid, lock: bool) -> Result<Product> {
    let sql = if lock { "SELECT * FROM products WHERE id = $1 FOR UPDATE" } else { "SELECT * FROM products WHERE id = $1" };
    sqlx::query_as::<_, Product>(sql).bind(id).fetch_optional(conn).await?.ok_or(ShopError::ProductNotFound)
}

async fn load_cart(conn: &mut PgConnection, user_id: Uuid, sql: &str) -> Result<Cart> {
    let items = sqlx::query_as::<_, CartItem>(sql).bind(user_id).fetch_all(conn).await?;
    Ok(Cart::new(user_id, items))
}

async fn write_line(conn: &mut PgConnection, user_id: Uuid, change: LineChange) -> Result<()> {
    match change {
        LineChange::Upsert { product_id, quantity } => {
            sqlx::query("INSERT INTO cart_items (id, user_id, product_id, quantity, created_at) VALUES ($1, $2, $3, $4, NOW()) \
                 ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity")
                .bind(Uuid::now_v7()).bind(user_id).bind(product_id).bind(quantity).execute(conn).await?;
        }
        LineChange::Remove { product_id } => {
            sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2").bind(user_id).bind(product_id).execute(conn).await?;
        }
    }
    Ok(())
}

async fn find_coupon(conn: &mut PgConnection, code: &str, lock: bool) -> Result<Coupon> {
    let code = CouponCode::new(code).map_err(|e| ShopError::Validation(e.to_string()))?;
    let sql = if lock { "SELECT * FROM coupons WHERE code = $1 FOR UPDATE" } else { "SELECT * FROM coupons WHERE code = $1" };
    sqlx::query_as::<_, Coupon>(sql).bind(code.as_str()).fetch_optional(conn).await?
        .ok_or_else(|| ShopError::CouponNotFound(code.into_string()))
}

async fn find_order(conn: &mut PgConnection, user_id: Uuid, order_id: Uuid, lock: bool) -> Result<Order> {
    let sql = if lock { "SELECT * FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE" } else { "SELECT * FROM orders WHERE id = $1 AND user_id = $2" };
    sqlx::query_as::<_, Order>(sql).bind(order_id).bind(user_id).fetch_optional(conn).await?.ok_or(ShopError::OrderNotFound)
}

/// Insert the order unless its number is taken; returns whether it was written.
async fn insert_order(conn: &mut PgConnection, o: &Order) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO orders (id, order_number, user_id, status, payment_status, payment_method, shipping_address, shipping_city, \
         shipping_postal_code, shipping_phone, billing_address, notes, coupon_code, subtotal, shipping_cost, discount, total, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
         ON CONFLICT (order_number) DO NOTHING")
        .bind(o.id).bind(&o.order_number).bind(o.user_id).bind(o.status).bind(o.payment_status).bind(o.payment_method)
        .bind(&o.shipping_address).bind(&o.shipping_city).bind(&o.shipping_postal_code).bind(&o.shipping_phone)
        .bind(&o.billing_address).bind(&o.notes).bind(&o.coupon_code)
        .bind(o.subtotal).bind(o.shipping_cost).bind(o.discount).bind(o.total).bind(o.created_at).bind(o.updated_at)
        .execute(conn).await?;
    Ok(result.rows_affected() == 1)
}

async fn write_order_payment(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("UPDATE orders SET payment_method = $2, payment_status = $3, updated_at = $4 WHERE id = $1")
        .bind(order.id).bind(order.payment_method).bind(order.payment_status).bind(order.updated_at).execute(conn).await?;
    Ok(())
}

async fn load_address_book(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<ShippingAddress>> {
    Ok(sqlx::query_as::<_, ShippingAddress>("SELECT * FROM shipping_addresses WHERE user_id = $1 ORDER BY created_at, id")
        .bind(user_id).fetch_all(conn).await?)
}

/// Clear every default flag of the user except `keep`'s.
async fn clear_other_defaults(conn: &mut PgConnection, user_id: Uuid, keep: Uuid) -> Result<()> {
    sqlx::query("UPDATE shipping_addresses SET is_default = FALSE WHERE user_id = $1 AND is_default AND id <> $2")
        .bind(user_id).bind(keep).execute(conn).await?;
    Ok(())
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let p = Product::create(product)?;
        sqlx::query_as::<_, Product>(
            "INSERT INTO products (id, category_id, name, slug, description, price, old_price, stock, is_active, is_featured, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *")
            .bind(p.id).bind(p.category_id).bind(&p.name).bind(&p.slug).bind(&p.description).bind(p.price).bind(p.old_price)
            .bind(p.stock).bind(p.is_active).bind(p.is_featured).bind(p.created_at).bind(p.updated_at)
            .fetch_one(&self.pool).await
            .map_err(|e| if is_foreign_key_violation(&e) { ShopError::CategoryNotFound } else { e.into() })
    }

    async fn product(&self, id: Uuid) -> Result<Product> {
        let mut conn = self.pool.acquire().await?;
        find_product(&mut conn, id, false).await
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        query.check()?;
        let sql = format!("{PRODUCT_SEARCH_SQL} ORDER BY {} LIMIT $6 OFFSET $7", order_clause(query.sort));
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(query.search_term().map(contains_pattern)).bind(query.category_id)
            .bind(query.min_price).bind(query.max_price).bind(query.featured)
            .bind(i64::from(query.page.per_page)).bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool).await?)
    }

    async fn restock(&self, id: Uuid, stock: i32) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let mut product = find_product(&mut tx, id, true).await?;
        product.restock(stock)?;
        sqlx::query("UPDATE products SET stock = $2, updated_at = $3 WHERE id = $1")
            .bind(id).bind(product.stock).bind(product.updated_at).execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::info!(product_id = %id, stock, "product restocked");
        Ok(product)
    }

    async fn set_product_active(&self, id: Uuid, active: bool) -> Result<Product> {
        sqlx::query_as::<_, Product>("UPDATE products SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING *")
            .bind(id).bind(active).fetch_optional(&self.pool).await?.ok_or(ShopError::ProductNotFound)
    }

    async fn create_category(&self, category: NewCategory) -> Result<Category> {
        let c = Category::create(category)?;
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (id, name, slug, description, icon, is_active, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *")
            .bind(c.id).bind(&c.name).bind(&c.slug).bind(&c.description).bind(&c.icon).bind(c.is_active).bind(c.created_at)
            .fetch_one(&self.pool).await
            .map_err(|e| if is_unique_violation(&e) { ShopError::Validation(format!("slug: {} already exists", c.slug)) } else { e.into() })
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        Ok(sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE is_active ORDER BY name, id").fetch_all(&self.pool).await?)
    }

    async fn category(&self, slug: &str) -> Result<Category> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE slug = $1 AND is_active")
            .bind(slug).fetch_optional(&self.pool).await?.ok_or(ShopError::CategoryNotFound)
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn cart(&self, user_id: Uuid) -> Result<CartSummary> {
        let mut conn = self.pool.acquire().await?;
        load_cart(&mut conn, user_id, CART_SQL).await?.try_into()
    }

    async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartSummary> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        let product = find_product(&mut tx, product_id, false).await?;
        let mut cart = load_cart(&mut tx, user_id, CART_SQL).await?;
        let change = cart.add_item(&product, quantity)?;
        let summary = CartSummary::try_from(cart)?;
        write_line(&mut tx, user_id, change).await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn update_cart_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<CartSummary> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        let mut cart = load_cart(&mut tx, user_id, CART_SQL).await?;
        let change = cart.update_quantity(product_id, quantity)?;
        let summary = CartSummary::try_from(cart)?;
        write_line(&mut tx, user_id, change).await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn remove_from_cart(&self, user_id: Uuid, product_id: Uuid) -> Result<CartSummary> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        let mut cart = load_cart(&mut tx, user_id, CART_SQL).await?;
        let change = cart.remove_item(product_id)?;
        let summary = CartSummary::try_from(cart)?;
        write_line(&mut tx, user_id, change).await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user_id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CouponRepository for PgStore {
    async fn create_coupon(&self, coupon: NewCoupon) -> Result<Coupon> {
        let c = Coupon::create(coupon)?;
        sqlx::query_as::<_, Coupon>(
            "INSERT INTO coupons (id, code, discount_type, discount_value, min_purchase, max_discount, valid_from, valid_to, \
             usage_limit, used_count, is_active, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *")
            .bind(c.id).bind(&c.code).bind(c.discount_type).bind(c.discount_value).bind(c.min_purchase).bind(c.max_discount)
            .bind(c.valid_from).bind(c.valid_to).bind(c.usage_limit).bind(c.used_count).bind(c.is_active).bind(c.created_at)
            .fetch_one(&self.pool).await
            .map_err(|e| if is_unique_violation(&e) { ShopError::Validation(format!("code: {} already exists", c.code)) } else { e.into() })
    }

    async fn active_coupons(&self) -> Result<Vec<Coupon>> {
        Ok(sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE is_active AND valid_from <= NOW() AND valid_to >= NOW() AND used_count < usage_limit \
             ORDER BY valid_to DESC")
            .fetch_all(&self.pool).await?)
    }

    async fn preview_coupon(&self, user_id: Uuid, code: &str) -> Result<CouponPreview> {
        let mut conn = self.pool.acquire().await?;
        let cart = load_cart(&mut conn, user_id, CART_SQL).await?;
        if cart.is_empty() { return Err(ShopError::EmptyCart); }
        find_coupon(&mut conn, code, false).await?.preview(Utc::now(), cart.subtotal()?)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn checkout(&self, user_id: Uuid, request: CheckoutRequest) -> Result<OrderDetail> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        let cart = load_cart(&mut tx, user_id, CART_FOR_CHECKOUT_SQL).await?;
        let coupon = match request.coupon_code.as_deref() {
            Some(code) => Some(find_coupon(&mut tx, code, true).await?),
            None => None,
        };
        let mut plan = CheckoutPlan::build(&cart, coupon.as_ref(), &request, &self.settings, Utc::now())?;

        let mut attempts = 1;
        while !insert_order(&mut tx, &plan.order).await? {
            if attempts >= self.settings.order_number_attempts { return Err(ShopError::OrderNumberExhausted); }
            tracing::debug!(order_number = %plan.order.order_number, "order number taken, drawing another");
            plan.renumber(&self.settings);
            attempts += 1;
        }

        for line in &plan.lines {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, product_name, price, quantity, total) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(line.id).bind(line.order_id).bind(line.product_id).bind(&line.product_name)
                .bind(line.price).bind(line.quantity).bind(line.total)
                .execute(&mut *tx).await?;
        }
        for (product_id, quantity) in plan.reservations() {
            let taken = sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND is_active AND stock >= $2")
                .bind(product_id).bind(quantity).execute(&mut *tx).await?;
            if taken.rows_affected() != 1 {
                let product = find_product(&mut tx, product_id, false).await?;
                return Err(product.stock_error(quantity));
            }
        }
        if let Some(mut coupon) = coupon {
            coupon.record_use()?;
            sqlx::query("UPDATE coupons SET used_count = $2 WHERE id = $1").bind(coupon.id).bind(coupon.used_count).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user_id).execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!(order_number = %plan.order.order_number, %user_id, total = %plan.order.total, lines = plan.lines.len(), "order placed");
        Ok(OrderDetail { order: plan.order, lines: plan.lines })
    }

    async fn checkout_defaults(&self, user_id: Uuid) -> Result<CheckoutDefaults> {
        let mut conn = self.pool.acquire().await?;
        user_exists(&mut conn, user_id).await?;
        let default_address = sqlx::query_as::<_, ShippingAddress>("SELECT * FROM shipping_addresses WHERE user_id = $1 AND is_default")
            .bind(user_id).fetch_optional(&mut *conn).await?;
        let profile = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id).fetch_optional(&mut *conn).await?;
        Ok(CheckoutDefaults::prefill(default_address.as_ref(), profile.as_ref()))
    }

    async fn order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail> {
        let mut conn = self.pool.acquire().await?;
        let order = find_order(&mut conn, user_id, order_id, false).await?;
        let lines = sqlx::query_as::<_, OrderLine>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id).fetch_all(&mut *conn).await?;
        Ok(OrderDetail { order, lines })
    }

    async fn order_history(&self, user_id: Uuid) -> Result<Vec<Order>> {
        Ok(sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(user_id).fetch_all(&self.pool).await?)
    }

    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id).fetch_optional(&mut *tx).await?.ok_or(ShopError::OrderNotFound)?;
        order.transition(status)?;
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id).bind(order.status).bind(order.updated_at).execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::info!(order_number = %order.order_number, %status, "order status changed");
        Ok(order)
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn initiate_payment(&self, user_id: Uuid, order_id: Uuid, method: PaymentMethod) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let mut order = find_order(&mut tx, user_id, order_id, true).await?;
        let payment = Payment::initiate(&order, method)?;
        order.payment_method = method;
        payment.settle(&mut order)?;
        let payment = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments (id, order_id, payment_method, transaction_id, amount, status, details, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *")
            .bind(payment.id).bind(payment.order_id).bind(payment.payment_method).bind(&payment.transaction_id)
            .bind(payment.amount).bind(payment.status).bind(&payment.details).bind(payment.created_at).bind(payment.updated_at)
            .fetch_one(&mut *tx).await?;
        write_order_payment(&mut tx, &order).await?;
        tx.commit().await?;
        tracing::info!(order_number = %order.order_number, payment_id = %payment.id, status = %payment.status, "payment initiated");
        Ok(payment)
    }

    async fn update_payment(&self, payment_id: Uuid, update: PaymentUpdate) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let mut payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id).fetch_optional(&mut *tx).await?.ok_or(ShopError::PaymentNotFound)?;
        payment.apply(update)?;
        let mut order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(payment.order_id).fetch_optional(&mut *tx).await?.ok_or(ShopError::OrderNotFound)?;
        payment.settle(&mut order)?;
        sqlx::query("UPDATE payments SET status = $2, transaction_id = $3, details = $4, updated_at = $5 WHERE id = $1")
            .bind(payment.id).bind(payment.status).bind(&payment.transaction_id).bind(&payment.details).bind(payment.updated_at)
            .execute(&mut *tx).await?;
        write_order_payment(&mut tx, &order).await?;
        tx.commit().await?;
        tracing::info!(%payment_id, status = %payment.status, "payment updated");
        Ok(payment)
    }

    async fn payments(&self, user_id: Uuid, order_id: Uuid) -> Result<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        find_order(&mut conn, user_id, order_id, false).await?;
        Ok(sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at, id")
            .bind(order_id).fetch_all(&mut *conn).await?)
    }
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let account = Account::open(account)?;
        let (user, profile) = (&account.user, &account.profile);
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO users (id, username, email, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id).bind(&user.username).bind(&user.email).bind(user.created_at)
            .execute(&mut *tx).await
            .map_err(|e| if is_unique_violation(&e) { ShopError::DuplicateUser(user.username.clone()) } else { e.into() })?;
        sqlx::query("INSERT INTO user_profiles (user_id, phone, address, city, postal_code, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(profile.user_id).bind(&profile.phone).bind(&profile.address).bind(&profile.city).bind(&profile.postal_code)
            .bind(profile.created_at).bind(profile.updated_at)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::info!(user_id = %user.id, username = %user.username, "account created");
        Ok(account)
    }

    async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?.ok_or(ShopError::UserNotFound)
    }

    async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<UserProfile> {
        let mut tx = self.pool.begin().await?;
        let mut profile = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1 FOR UPDATE")
            .bind(user_id).fetch_optional(&mut *tx).await?.ok_or(ShopError::UserNotFound)?;
        profile.apply(update)?;
        sqlx::query("UPDATE user_profiles SET phone = $2, address = $3, city = $4, postal_code = $5, updated_at = $6 WHERE user_id = $1")
            .bind(user_id).bind(&profile.phone).bind(&profile.address).bind(&profile.city).bind(&profile.postal_code).bind(profile.updated_at)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(profile)
    }

    async fn addresses(&self, user_id: Uuid) -> Result<Vec<ShippingAddress>> {
        let mut conn = self.pool.acquire().await?;
        load_address_book(&mut conn, user_id).await
    }

    async fn add_address(&self, user_id: Uuid, input: AddressInput) -> Result<ShippingAddress> {
        let a = ShippingAddress::create(user_id, input)?;
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        if a.is_default { clear_other_defaults(&mut tx, user_id, a.id).await?; }
        sqlx::query("INSERT INTO shipping_addresses (id, user_id, full_name, phone, address, city, postal_code, is_default, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(a.id).bind(a.user_id).bind(&a.full_name).bind(&a.phone).bind(&a.address).bind(&a.city)
            .bind(&a.postal_code).bind(a.is_default).bind(a.created_at)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(a)
    }

    async fn update_address(&self, user_id: Uuid, address_id: Uuid, input: AddressInput) -> Result<ShippingAddress> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        let mut a = sqlx::query_as::<_, ShippingAddress>("SELECT * FROM shipping_addresses WHERE id = $1 AND user_id = $2")
            .bind(address_id).bind(user_id).fetch_optional(&mut *tx).await?.ok_or(ShopError::AddressNotFound)?;
        a.apply(input)?;
        if a.is_default { clear_other_defaults(&mut tx, user_id, a.id).await?; }
        sqlx::query("UPDATE shipping_addresses SET full_name = $2, phone = $3, address = $4, city = $5, postal_code = $6, is_default = $7 WHERE id = $1")
            .bind(a.id).bind(&a.full_name).bind(&a.phone).bind(&a.address).bind(&a.city).bind(&a.postal_code).bind(a.is_default)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(a)
    }

    async fn set_default_address(&self, user_id: Uuid, address_id: Uuid) -> Result<Vec<ShippingAddress>> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        let mut book = load_address_book(&mut tx, user_id).await?;
        account::assign_default(&mut book, address_id)?;
        clear_other_defaults(&mut tx, user_id, address_id).await?;
        sqlx::query("UPDATE shipping_addresses SET is_default = TRUE WHERE id = $1").bind(address_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(book)
    }

    async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM shipping_addresses WHERE id = $1 AND user_id = $2")
            .bind(address_id).bind(user_id).execute(&self.pool).await?;
        if deleted.rows_affected() == 0 { return Err(ShopError::AddressNotFound); }
        Ok(())
    }
}

#[async_trait]
impl EngagementRepository for PgStore {
    async fn wishlist(&self, user_id: Uuid) -> Result<Vec<WishlistItem>> {
        Ok(sqlx::query_as::<_, WishlistItem>(
            "SELECT w.user_id, w.product_id, p.name AS product_name, w.added_at FROM wishlist_items w \
             JOIN products p ON p.id = w.product_id WHERE w.user_id = $1 ORDER BY w.added_at")
            .bind(user_id).fetch_all(&self.pool).await?)
    }

    async fn add_to_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        user_exists(&mut conn, user_id).await?;
        find_product(&mut conn, product_id, false).await?;
        let inserted = sqlx::query("INSERT INTO wishlist_items (user_id, product_id, added_at) VALUES ($1, $2, NOW()) ON CONFLICT DO NOTHING")
            .bind(user_id).bind(product_id).execute(&mut *conn).await?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn remove_from_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2").bind(user_id).bind(product_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn toggle_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        find_product(&mut tx, product_id, false).await?;
        let removed = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id).bind(product_id).execute(&mut *tx).await?;
        if removed.rows_affected() == 0 {
            sqlx::query("INSERT INTO wishlist_items (user_id, product_id, added_at) VALUES ($1, $2, NOW())")
                .bind(user_id).bind(product_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(removed.rows_affected() == 0)
    }

    async fn submit_review(&self, user_id: Uuid, product_id: Uuid, input: ReviewInput) -> Result<Review> {
        let mut tx = self.pool.begin().await?;
        find_product(&mut tx, product_id, false).await?;
        let purchased: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM order_items oi JOIN orders o ON o.id = oi.order_id WHERE o.user_id = $1 AND oi.product_id = $2)")
            .bind(user_id).bind(product_id).fetch_one(&mut *tx).await?;
        if !purchased { return Err(ShopError::NotPurchased); }
        let existing = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE product_id = $1 AND user_id = $2 FOR UPDATE")
            .bind(product_id).bind(user_id).fetch_optional(&mut *tx).await?;
        let r = Review::submit(existing, product_id, user_id, input)?;
        let review = sqlx::query_as::<_, Review>(
            "INSERT INTO reviews (id, product_id, user_id, rating, comment, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (product_id, user_id) DO UPDATE SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, updated_at = EXCLUDED.updated_at \
             RETURNING *")
            .bind(r.id).bind(r.product_id).bind(r.user_id).bind(r.rating).bind(&r.comment).bind(r.created_at).bind(r.updated_at)
            .fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(review)
    }

    async fn reviews(&self, product_id: Uuid) -> Result<Vec<Review>> {
        Ok(sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE product_id = $1 ORDER BY created_at DESC")
            .bind(product_id).fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl AnalyticsRepository for PgStore {
    async fn dashboard(&self) -> Result<Dashboard> {
        let window = ReportWindow::at(Utc::now());
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY").execute(&mut *tx).await?;
        let sales = sqlx::query_as::<_, SalesSummary>(
            "SELECT COUNT(*) AS total_orders, \
                    COUNT(*) FILTER (WHERE status = 'pending') AS pending_orders, \
                    COUNT(*) FILTER (WHERE created_at >= $1) AS today_orders, \
                    COUNT(*) FILTER (WHERE created_at >= $2) AS weekly_orders, \
                    COALESCE(SUM(total), 0) AS total_revenue, \
                    COALESCE(SUM(total) FILTER (WHERE created_at >= $2 AND payment_status = 'paid'), 0) AS weekly_revenue \
             FROM orders")
            .bind(window.today).bind(window.week).fetch_one(&mut *tx).await?;
        let (total_users, new_users_week): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(*) FILTER (WHERE created_at >= $1) FROM users")
                .bind(window.week).fetch_one(&mut *tx).await?;
        let rows = DASHBOARD_ROWS as i64;
        let top_products = sqlx::query_as::<_, TopProduct>(
            "SELECT p.id AS product_id, p.name, SUM(oi.quantity)::BIGINT AS units_sold FROM order_items oi \
             JOIN products p ON p.id = oi.product_id GROUP BY p.id, p.name ORDER BY units_sold DESC, p.name LIMIT $1")
            .bind(rows).fetch_all(&mut *tx).await?;
        let low_stock = sqlx::query_as::<_, StockAlert>(
            "SELECT id AS product_id, name, stock FROM products WHERE is_active AND stock < $1 ORDER BY stock, name LIMIT $2")
            .bind(LOW_STOCK_THRESHOLD).bind(rows).fetch_all(&mut *tx).await?;
        let recent_orders = sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at DESC, id DESC LIMIT $1")
            .bind(rows).fetch_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(Dashboard { sales, total_users, new_users_week, top_products, low_stock, recent_orders })
    }
}
