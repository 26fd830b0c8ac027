use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use services::{
    content_service::{ContentStore, FsContentStore},
    derivative::DerivativeGenerator,
    identity::{IdentityCache, IdentityProvider, PassthroughProvider},
    metadata_service::{self, MetadataStore, SqliteMetadataStore},
    resizer::Resizer,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting photo-resizer with config: {:?}", cfg);

    // --- Ensure content directories exist ---
    for dir in [&cfg.storage_dir, &cfg.upload_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir))?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_opts = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await?,
    );

    // --- Schema (idempotent) ---
    metadata_service::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize services ---
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(db.clone()));
    let content: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(
        cfg.storage_dir.clone(),
        cfg.upload_dir.clone(),
    ));
    let resizer = Resizer::new(
        metadata.clone(),
        content.clone(),
        DerivativeGenerator::default(),
        cfg.resize_concurrency,
    );
    let provider: Arc<dyn IdentityProvider> = Arc::new(PassthroughProvider);
    let identity = Arc::new(IdentityCache::new(provider, cfg.identity_cache_size));

    let state = AppState {
        db,
        storage_dir: cfg.storage_dir.clone().into(),
        metadata,
        content,
        resizer,
        identity,
    };

    // --- Build router ---
    let app = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
