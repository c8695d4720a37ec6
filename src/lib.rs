use std::sync::Arc;

use axum::Router;
use axum_macros::FromRef;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod authentication;
pub mod config;
pub mod connection;
pub mod error;
pub mod filters;
pub mod gcs;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod routes;
pub mod schema;
pub mod storage;
pub mod store;
pub mod transfer;

use crate::authentication::AuthContext;
use crate::config::{Config, StorageBackend, StoreBackend};
use crate::gcs::GcsBucket;
use crate::memory_store::MemoryStore;
use crate::pg_store::PgStore;
use crate::storage::{LocalBucket, MemoryBucket, ObjectStorage};
use crate::store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub auth: Arc<AuthContext>,
}

impl AppState {
    /// Connects the configured backends. A Postgres store is migrated before use.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match &config.store {
            StoreBackend::Postgres { database_url, max_connections } => {
                let pool = connection::establish_pool(database_url, *max_connections)?;
                connection::run_pending_migrations(&pool)?;
                info!("Connected to Postgres");
                Arc::new(PgStore::new(pool))
            }
            StoreBackend::Memory => {
                info!("Using in-memory store; data is lost on exit");
                Arc::new(MemoryStore::new())
            }
        };

        let storage: Arc<dyn ObjectStorage> = match &config.storage {
            StorageBackend::Gcs { bucket } => {
                info!(%bucket, "Using Google Cloud Storage bucket");
                Arc::new(GcsBucket::new(bucket.clone()))
            }
            StorageBackend::Local { root } => {
                info!(root = %root.display(), "Using local storage directory");
                Arc::new(LocalBucket::new(root.clone()))
            }
            StorageBackend::Memory => Arc::new(MemoryBucket::new()),
        };

        let auth = Arc::new(AuthContext::new(&config.jwt_secret, config.jwt_audience.as_deref()));

        Ok(AppState { store, storage, auth })
    }
}

pub fn create_app(state: AppState, config: &Config) -> Router {
    let mut app = routes::router(config.max_upload_bytes).layer(TraceLayer::new_for_http());

    if config.local_dev_deployment {
        info!("Local dev deployment");
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}
