//! Shared state handed to every handler.

use crate::services::{
    content_service::ContentStore,
    identity::{IdentityCache, IdentityProvider},
    metadata_service::MetadataStore,
    resizer::Resizer,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

pub type Identity = IdentityCache<Arc<dyn IdentityProvider>>;

#[derive(Clone)]
pub struct AppState {
    /// Pool behind the metadata store, used directly by readiness checks.
    pub db: Arc<SqlitePool>,
    /// Content root, probed by readiness checks.
    pub storage_dir: PathBuf,
    pub metadata: Arc<dyn MetadataStore>,
    pub content: Arc<dyn ContentStore>,
    pub resizer: Resizer,
    pub identity: Arc<Identity>,
}
