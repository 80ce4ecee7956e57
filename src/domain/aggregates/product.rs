//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::{round_money, slugify};
use crate::ShopError;

/// Largest price a `NUMERIC(10, 2)` column holds.
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub stock: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct NewProduct {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[serde(default)]
    pub is_featured: bool,
}

/// Product as served over the API, with the derived shop-front fields.
#[derive(Clone, Debug, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub in_stock: bool,
    pub discount_percentage: Decimal,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self { in_stock: product.in_stock(), discount_percentage: product.discount_percentage(), product }
    }
}

fn check_price(field: &str, price: Decimal) -> Result<Decimal, ShopError> {
    if price.is_sign_negative() { return Err(ShopError::Validation(format!("{field}: must not be negative"))); }
    let price = round_money(price);
    if price > MAX_PRICE { return Err(ShopError::Validation(format!("{field}: must not exceed {MAX_PRICE}"))); }
    Ok(price)
}

impl Product {
    pub fn create(new: NewProduct) -> Result<Self, ShopError> {
        new.validate()?;
        let price = check_price("price", new.price)?;
        let old_price = new.old_price.map(|p| check_price("old_price", p)).transpose()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), category_id: new.category_id, slug: slugify(&new.name), name: new.name,
            description: new.description, price, old_price, stock: new.stock,
            is_active: true, is_featured: new.is_featured, created_at: now, updated_at: now,
        })
    }

    pub fn in_stock(&self) -> bool { self.stock > 0 }

    /// Whether `quantity` units can be sold right now.
    pub fn can_fulfil(&self, quantity: i32) -> bool { self.is_active && quantity <= self.stock }

    /// Percentage saved against `old_price`, rounded to a whole number.
    pub fn discount_percentage(&self) -> Decimal {
        match self.old_price {
            Some(old) if old > Decimal::ZERO => ((old - self.price) / old * Decimal::ONE_HUNDRED).round(),
            _ => Decimal::ZERO,
        }
    }

    pub fn stock_error(&self, requested: i32) -> ShopError {
        ShopError::StockUnavailable {
            product_id: self.id,
            product: self.name.clone(),
            requested,
            available: if self.is_active { self.stock } else { 0 },
        }
    }

    /// Take `quantity` units out of stock.
    pub fn remove_inventory(&mut self, quantity: i32) -> Result<(), ShopError> {
        if quantity <= 0 { return Err(ShopError::InvalidQuantity); }
        if !self.can_fulfil(quantity) { return Err(self.stock_error(quantity)); }
        self.stock -= quantity;
        self.touch();
        Ok(())
    }

    pub fn restock(&mut self, stock: i32) -> Result<(), ShopError> {
        if stock < 0 { return Err(ShopError::InvalidQuantity); }
        self.stock = stock;
        self.touch();
        Ok(())
    }

    pub fn set_active(&mut self, active: bool) { self.is_active = active; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
pub(crate) fn sample(name: &str, price: Decimal, stock: i32) -> Product {
    Product::create(NewProduct { name: name.into(), price, stock, ..Default::default() }).unwrap()
}
