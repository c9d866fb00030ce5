//! Auth Engine: issues, validates and manages workspace-scoped API tokens,
//! optionally restricted to DAILY, WEEKLY or DATERANGE validity windows.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod service;
pub mod store;
pub mod vault;

use std::sync::Arc;

use service::TokenService;
use store::{memory::MemoryStore, postgres::PgStore, TokenStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub tokens: TokenService,
    pub config: config::Config,
}

impl AppState {
    pub fn new(store: Arc<dyn TokenStore>, config: config::Config) -> anyhow::Result<Self> {
        Ok(Self {
            tokens: TokenService::new(store, config.clone())?,
            config,
        })
    }
}

/// Open the store named by `database_url`: `memory://` for the in-process
/// store, anything else is a PostgreSQL URL. Postgres is migrated when
/// `migrate` is set.
pub async fn open_store(database_url: &str, migrate: bool) -> anyhow::Result<Arc<dyn TokenStore>> {
    if database_url.starts_with("memory://") {
        tracing::warn!("using the in-memory store, tokens are lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(database_url).await?;
    if migrate {
        tracing::info!("Running migrations...");
        db.migrate().await?;
    }
    Ok(Arc::new(db))
}
