//! # Civic-Board Binary
//!
//! The entry point that assembles the application based on compile-time features.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use cb_api::configure_routes;
use cb_api::handlers::AppState;
use cb_api::middleware::{cors_policy, standard_middleware};
use cb_config::{LogSettings, Settings};
use cb_engine::CivicEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(not(any(feature = "db-sqlite", feature = "store-memory")))]
compile_error!("enable a store feature: `db-sqlite` or `store-memory`");

#[cfg(not(feature = "auth-jwt"))]
compile_error!("enable an identity feature: `auth-jwt`");

#[cfg(feature = "auth-jwt")]
use cb_auth_jwt::JwtIdentity;

#[cfg(feature = "db-sqlite")]
use cb_db_sqlite::SqliteStore;

#[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
use cb_store_memory::MemoryStore;

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[cfg(feature = "db-sqlite")]
async fn build_engine(settings: &Settings) -> anyhow::Result<CivicEngine> {
    let store = SqliteStore::connect(&settings.database.url)
        .await
        .context("failed to open the sqlite store")?;
    if store.is_in_memory() {
        tracing::warn!("sqlite database is in memory; data is lost on shutdown");
    }
    Ok(CivicEngine::with_store(Arc::new(store)))
}

#[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
async fn build_engine(_settings: &Settings) -> anyhow::Result<CivicEngine> {
    tracing::warn!("using the in-memory store; data is lost on shutdown");
    Ok(CivicEngine::with_store(Arc::new(MemoryStore::new())))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_tracing(&settings.log);

    // 1. Initialize the store implementation behind the engine
    let engine = build_engine(&settings).await?;

    // 2. Initialize the identity implementation
    let identity = JwtIdentity::new(&settings.auth.jwt_secret, settings.auth.issuer.as_deref());

    // 3. Wrap in AppState (dynamic dispatch over the ports)
    let state = web::Data::new(AppState {
        engine,
        identity: Box::new(identity),
    });

    let (host, port) = settings.bind_address();
    info!(%host, port, "civic-board starting");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_policy())
            .wrap(standard_middleware())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("failed to bind {host}:{port}"))?
    .run()
    .await?;

    Ok(())
}
