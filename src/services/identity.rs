//! Resolves caller identities to display names, with a bounded LRU cache in
//! front of the identity provider.

use async_trait::async_trait;
use lru::LruCache;
use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    Provider(String),
}

/// Source of truth for identity lookups.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns `None` for an unknown subject.
    async fn lookup(&self, subject: &str) -> Result<Option<String>, IdentityError>;
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    async fn lookup(&self, subject: &str) -> Result<Option<String>, IdentityError> {
        (**self).lookup(subject).await
    }
}

/// Provider used when the caller's subject already is the display name.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughProvider;

#[async_trait]
impl IdentityProvider for PassthroughProvider {
    async fn lookup(&self, subject: &str) -> Result<Option<String>, IdentityError> {
        Ok(Some(subject.to_string()))
    }
}

/// Fixed-capacity, least-recently-used cache over an [`IdentityProvider`].
///
/// Only successful lookups are cached; misses and provider errors go back to
/// the provider next time.
pub struct IdentityCache<P> {
    provider: P,
    entries: Mutex<LruCache<String, String>>,
}

impl<P: IdentityProvider> IdentityCache<P> {
    pub fn new(provider: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn resolve(&self, subject: &str) -> Result<Option<String>, IdentityError> {
        if let Some(name) = self.cached(subject) {
            return Ok(Some(name));
        }

        debug!("identity cache miss for {}", subject);
        let resolved = self.provider.lookup(subject).await?;
        if let Some(name) = &resolved {
            self.lock().put(subject.to_string(), name.clone());
        }
        Ok(resolved)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn cached(&self, subject: &str) -> Option<String> {
        self.lock().get(subject).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
