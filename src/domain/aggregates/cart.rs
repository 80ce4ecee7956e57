//! Cart Aggregate

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::Product;
use crate::ShopError;

/// A cart line joined with the live product it refers to.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct CartItem {
    #[sqlx(flatten)]
    pub product: Product,
    pub quantity: i32,
}

impl CartItem {
    pub fn line_total(&self) -> Result<Decimal, ShopError> {
        self.product.price.checked_mul(Decimal::from(self.quantity)).ok_or(ShopError::AmountOutOfRange)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Cart {
    user_id: Uuid,
    items: Vec<CartItem>,
}

/// What a cart mutation did to a single line, for the store to persist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineChange {
    Upsert { product_id: Uuid, quantity: i32 },
    Remove { product_id: Uuid },
}

impl Cart {
    pub fn new(user_id: Uuid, items: Vec<CartItem>) -> Self { Self { user_id, items } }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn total_items(&self) -> i32 { self.items.iter().map(|i| i.quantity).sum() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn subtotal(&self) -> Result<Decimal, ShopError> {
        self.items.iter().try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.line_total()?).ok_or(ShopError::AmountOutOfRange))
    }

    pub fn quantity_of(&self, product_id: Uuid) -> i32 {
        self.items.iter().find(|i| i.product.id == product_id).map_or(0, |i| i.quantity)
    }

    /// Add `quantity` units of `product`, merging with an existing line. The
    /// merged quantity may not exceed live stock.
    pub fn add_item(&mut self, product: &Product, quantity: i32) -> Result<LineChange, ShopError> {
        if quantity <= 0 { return Err(ShopError::InvalidQuantity); }
        if !product.is_active { return Err(ShopError::ProductNotFound); }
        let merged = self.quantity_of(product.id).saturating_add(quantity);
        if merged > product.stock { return Err(product.stock_error(merged)); }
        match self.items.iter_mut().find(|i| i.product.id == product.id) {
            Some(existing) => { existing.quantity = merged; existing.product = product.clone(); }
            None => self.items.push(CartItem { product: product.clone(), quantity: merged }),
        }
        Ok(LineChange::Upsert { product_id: product.id, quantity: merged })
    }

    /// Set a line's quantity outright; zero removes the line.
    pub fn update_quantity(&mut self, product_id: Uuid, quantity: i32) -> Result<LineChange, ShopError> {
        if quantity < 0 { return Err(ShopError::InvalidQuantity); }
        if quantity == 0 { return self.remove_item(product_id); }
        let item = self.items.iter_mut().find(|i| i.product.id == product_id).ok_or(ShopError::CartItemNotFound)?;
        if quantity > item.product.stock { return Err(item.product.stock_error(quantity)); }
        item.quantity = quantity;
        Ok(LineChange::Upsert { product_id, quantity })
    }

    pub fn remove_item(&mut self, product_id: Uuid) -> Result<LineChange, ShopError> {
        let before = self.items.len();
        self.items.retain(|i| i.product.id != product_id);
        if self.items.len() == before { return Err(ShopError::CartItemNotFound); }
        Ok(LineChange::Remove { product_id })
    }
}

/// Cart as shown to the shopper.
#[derive(Clone, Debug, Serialize)]
pub struct CartSummary {
    pub items: Vec<CartItem>,
    pub item_count: usize,
    pub total_items: i32,
    pub subtotal: Decimal,
}

impl TryFrom<Cart> for CartSummary {
    type Error = ShopError;

    fn try_from(cart: Cart) -> Result<Self, ShopError> {
        Ok(Self { item_count: cart.item_count(), total_items: cart.total_items(), subtotal: cart.subtotal()?, items: cart.items })
    }
}
