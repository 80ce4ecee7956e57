//! Service configuration, read from the environment (optionally via `.env`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use crate::domain::checkout::{CheckoutSettings, ShippingPolicy};

#[derive(Clone, Debug)]
pub struct ShopConfig {
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub checkout: CheckoutSettings,
}

impl ShopConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = CheckoutSettings::default();
        let checkout = CheckoutSettings {
            shipping: ShippingPolicy {
                free_threshold: parse(&lookup, "SHIPPING_FREE_THRESHOLD")?.unwrap_or(defaults.shipping.free_threshold),
                flat_fee: parse(&lookup, "SHIPPING_FLAT_FEE")?.unwrap_or(defaults.shipping.flat_fee),
            },
            order_number_length: parse(&lookup, "ORDER_NUMBER_LENGTH")?.unwrap_or(defaults.order_number_length),
            order_number_attempts: parse(&lookup, "ORDER_NUMBER_ATTEMPTS")?.unwrap_or(defaults.order_number_attempts),
        };
        if checkout.shipping.flat_fee < Decimal::ZERO { anyhow::bail!("SHIPPING_FLAT_FEE must not be negative"); }
        if !(6..=32).contains(&checkout.order_number_length) { anyhow::bail!("ORDER_NUMBER_LENGTH must be between 6 and 32"); }
        if checkout.order_number_attempts == 0 { anyhow::bail!("ORDER_NUMBER_ATTEMPTS must be at least 1"); }
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS")?.unwrap_or(10),
            port: parse(&lookup, "PORT")?.unwrap_or(8083),
            nats_url: lookup("NATS_URL").filter(|s| !s.is_empty()),
            checkout,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key).map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid {key}: {raw}"))).transpose()
}
