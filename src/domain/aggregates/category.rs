//! Category Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::ProductView;
use crate::domain::value_objects::slugify;
use crate::ShopError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub icon: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct NewCategory {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub icon: Option<String>,
}

impl Category {
    pub fn create(new: NewCategory) -> Result<Self, ShopError> {
        new.validate()?;
        let slug = slugify(&new.name);
        if slug.is_empty() { return Err(ShopError::Validation("name: needs at least one letter or digit".into())); }
        Ok(Self {
            id: Uuid::now_v7(), slug, name: new.name.trim().to_string(), description: new.description,
            icon: new.icon.unwrap_or_else(|| "shopping-bag".into()), is_active: true, created_at: Utc::now(),
        })
    }
}

/// A category page: the category and its active products.
#[derive(Clone, Debug, Serialize)]
pub struct CategoryListing {
    pub category: Category,
    pub products: Vec<ProductView>,
}
