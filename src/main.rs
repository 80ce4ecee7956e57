//! bdshop - storefront service

use anyhow::Result;
use bdshop::api::{app, AppState};
use bdshop::config::ShopConfig;
use bdshop::domain::events::EventPublisher;
use bdshop::store::{MemoryStore, PgStore, Store};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ShopConfig::from_env()?;
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.max_connections).connect(url).await?;
            let store = PgStore::new(db, config.checkout);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new(config.checkout))
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => { tracing::warn!(error = %e, "NATS unavailable, domain events disabled"); None }
        },
        None => None,
    };
    let state = AppState { store, events: EventPublisher::new(nats) };

    tracing::info!("bdshop listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app(state)).await?;
    Ok(())
}
