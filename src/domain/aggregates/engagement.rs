//! Wishlist and product reviews

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::ShopError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WishlistItem { pub user_id: Uuid, pub product_id: Uuid, pub product_name: String, pub added_at: DateTime<Utc> }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ReviewInput {
    #[validate(range(min = 1, max = 5))]
    pub rating: i16,
    #[validate(length(min = 1, message = "Please write a review comment."))]
    pub comment: String,
}

impl Review {
    /// Create a review, or revise `existing` if the user already reviewed the product.
    pub fn submit(existing: Option<Review>, product_id: Uuid, user_id: Uuid, mut input: ReviewInput) -> Result<Self, ShopError> {
        input.comment = input.comment.trim().to_string();
        input.validate()?;
        let now = Utc::now();
        Ok(match existing {
            Some(mut review) => { review.rating = input.rating; review.comment = input.comment; review.updated_at = now; review }
            None => Self { id: Uuid::now_v7(), product_id, user_id, rating: input.rating, comment: input.comment, created_at: now, updated_at: now },
        })
    }
}
