//! Account, profile and address book

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::ShopError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User { pub id: Uuid, pub username: String, pub email: String, pub created_at: DateTime<Utc> }

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShippingAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct NewAccount {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(max = 15))]
    pub phone: Option<String>,
    pub address: Option<String>,
    #[validate(length(max = 100))]
    pub city: Option<String>,
    #[validate(length(max = 10))]
    pub postal_code: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[validate(length(min = 1, max = 15))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 10))]
    pub postal_code: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Account { pub user: User, pub profile: UserProfile }

impl Account {
    /// New user together with its empty profile. Both are persisted in the
    /// same unit of work by the store.
    pub fn open(new: NewAccount) -> Result<Self, ShopError> {
        new.validate()?;
        let now = Utc::now();
        let user = User { id: Uuid::now_v7(), username: new.username.trim().to_string(), email: new.email, created_at: now };
        let profile = UserProfile { user_id: user.id, created_at: now, updated_at: now, ..Default::default() };
        Ok(Self { user, profile })
    }
}

impl UserProfile {
    pub fn apply(&mut self, update: ProfileUpdate) -> Result<(), ShopError> {
        update.validate()?;
        self.phone = update.phone;
        self.address = update.address;
        self.city = update.city;
        self.postal_code = update.postal_code;
        self.updated_at = Utc::now();
        Ok(())
    }
}

impl ShippingAddress {
    pub fn create(user_id: Uuid, input: AddressInput) -> Result<Self, ShopError> {
        input.validate()?;
        Ok(Self {
            id: Uuid::now_v7(), user_id, full_name: input.full_name, phone: input.phone, address: input.address,
            city: input.city, postal_code: input.postal_code, is_default: input.is_default, created_at: Utc::now(),
        })
    }

    pub fn apply(&mut self, input: AddressInput) -> Result<(), ShopError> {
        input.validate()?;
        self.full_name = input.full_name;
        self.phone = input.phone;
        self.address = input.address;
        self.city = input.city;
        self.postal_code = input.postal_code;
        self.is_default = input.is_default;
        Ok(())
    }
}

/// Make `default_id` the only default among one user's addresses.
pub fn assign_default(addresses: &mut [ShippingAddress], default_id: Uuid) -> Result<(), ShopError> {
    if !addresses.iter().any(|a| a.id == default_id) { return Err(ShopError::AddressNotFound); }
    for address in addresses.iter_mut() { address.is_default = address.id == default_id; }
    Ok(())
}

/// Shipping fields offered on the checkout form.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CheckoutDefaults {
    pub shipping_address: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_phone: Option<String>,
}

impl CheckoutDefaults {
    /// Prefer the default address book entry, fall back to profile fields.
    pub fn prefill(default_address: Option<&ShippingAddress>, profile: Option<&UserProfile>) -> Self {
        if let Some(a) = default_address {
            return Self {
                shipping_address: Some(a.address.clone()), shipping_city: Some(a.city.clone()),
                shipping_postal_code: Some(a.postal_code.clone()), shipping_phone: Some(a.phone.clone()),
            };
        }
        profile.map(|p| Self {
            shipping_address: p.address.clone(), shipping_city: p.city.clone(),
            shipping_postal_code: p.postal_code.clone(), shipping_phone: p.phone.clone(),
        }).unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) fn address_input(city: &str, is_default: bool) -> AddressInput {
    AddressInput {
        full_name: "Rahim Uddin".into(), phone: "01711111111".into(), address: "House 7, Road 3".into(),
        city: city.into(), postal_code: "1207".into(), is_default,
    }
}
