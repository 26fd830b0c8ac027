use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub upload_dir: String,
    pub database_url: String,
    pub resize_concurrency: usize,
    pub identity_cache_size: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Photo upload and resize service")]
pub struct Args {
    /// Host to bind to (overrides RESIZER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RESIZER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding originals and derivatives (overrides RESIZER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory holding staged uploads (overrides RESIZER_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Database URL (overrides RESIZER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Max derivatives encoded at once per photo, and photos per batch (overrides RESIZER_CONCURRENCY)
    #[arg(long)]
    pub resize_concurrency: Option<usize>,

    /// Capacity of the identity lookup cache (overrides RESIZER_IDENTITY_CACHE_SIZE)
    #[arg(long)]
    pub identity_cache_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("RESIZER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("RESIZER_PORT", 3000u16)?;
        let env_storage =
            env::var("RESIZER_STORAGE_DIR").unwrap_or_else(|_| "./data/images".into());
        let env_upload = env::var("RESIZER_UPLOAD_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = env::var("RESIZER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/photos.db".into());
        let env_concurrency = env_number("RESIZER_CONCURRENCY", 4usize)?;
        let env_cache_size = env_number("RESIZER_IDENTITY_CACHE_SIZE", 100usize)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            upload_dir: args.upload_dir.unwrap_or(env_upload),
            database_url: args.database_url.unwrap_or(env_db),
            resize_concurrency: args.resize_concurrency.unwrap_or(env_concurrency).max(1),
            identity_cache_size: args.identity_cache_size.unwrap_or(env_cache_size).max(1),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
