use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Postgres { database_url: String, max_connections: u32 },
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Gcs { bucket: String },
    Local { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Expected `aud` claim. Unset means tokens are not checked for one.
    pub jwt_audience: Option<String>,
    pub store: StoreBackend,
    pub storage: StorageBackend,
    pub max_upload_bytes: usize,
    /// Permissive CORS for a frontend served from another origin.
    pub local_dev_deployment: bool,
}

fn default_bind_addr() -> &'static str {
    "0.0.0.0:9093"
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_storage_dir() -> &'static str {
    "./storage"
}

impl Config {
    /// Reads `.env` (if any) and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| default_bind_addr().to_string())
            .parse()
            .context("BIND_ADDR must be a socket address")?;

        let jwt_secret = lookup("JWT_SECRET").ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;
        let jwt_audience = lookup("JWT_AUDIENCE").filter(|v| !v.is_empty());

        let store = match lookup("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?,
                max_connections: match lookup("DATABASE_MAX_CONNECTIONS") {
                    Some(raw) => raw.parse().context("DATABASE_MAX_CONNECTIONS must be a number")?,
                    None => default_max_connections(),
                },
            },
            "memory" => StoreBackend::Memory,
            other => return Err(anyhow!("Unknown STORE_BACKEND: {}", other)),
        };

        let storage = match lookup("STORAGE_BACKEND").as_deref().unwrap_or("gcs") {
            "gcs" => StorageBackend::Gcs {
                bucket: lookup("STORAGE_BUCKET").ok_or_else(|| anyhow!("STORAGE_BUCKET must be set for gcs storage"))?,
            },
            "local" => StorageBackend::Local {
                root: PathBuf::from(lookup("STORAGE_DIR").unwrap_or_else(|| default_storage_dir().to_string())),
            },
            "memory" => StorageBackend::Memory,
            other => return Err(anyhow!("Unknown STORAGE_BACKEND: {}", other)),
        };

        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.parse().context("MAX_UPLOAD_BYTES must be a number")?,
            None => default_max_upload_bytes(),
        };

        Ok(Config {
            bind_addr,
            jwt_secret,
            jwt_audience,
            store,
            storage,
            max_upload_bytes,
            local_dev_deployment: lookup("LOCAL_DEV_DEPLOYMENT").is_some(),
        })
    }
}
