//! src/services/metadata_service.rs
//!
//! Metadata store for photos: one `photos` row per photo plus one
//! `photo_sizes` row per materialized size, kept in SQLite.

use crate::models::photo::{PhotoMetadata, PhotoRow};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, warn};

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Retrieval and update of photo metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Returns `None` when the photo has no metadata.
    async fn get(&self, photo_id: &str) -> MetadataResult<Option<PhotoMetadata>>;

    /// All photos belonging to `owner`, oldest upload first.
    async fn get_by_owner(&self, owner: &str) -> MetadataResult<Vec<PhotoMetadata>>;

    /// Stores the record, replacing the previous descriptive fields. The
    /// recorded size set only grows: sizes missing from `metadata` are kept.
    /// Returns `false` and writes nothing if the record is not valid.
    async fn put(&self, metadata: &PhotoMetadata) -> MetadataResult<bool>;

    /// Removes the record if it exists.
    async fn delete(&self, photo_id: &str) -> MetadataResult<()>;
}

/// SQLite-backed [`MetadataStore`].
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn fetch_sizes(&self, photo_id: &str) -> MetadataResult<BTreeSet<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT size_name FROM photo_sizes WHERE photo_id = ?")
                .bind(photo_id)
                .fetch_all(&*self.db)
                .await?;
        Ok(names.into_iter().collect())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, photo_id: &str) -> MetadataResult<Option<PhotoMetadata>> {
        debug!("retrieving metadata for photo {}", photo_id);
        let row = sqlx::query_as::<_, PhotoRow>(
            "SELECT id, owner, filename, mime_type, description, uploaded_at
             FROM photos WHERE id = ?",
        )
        .bind(photo_id)
        .fetch_optional(&*self.db)
        .await?;

        match row {
            Some(row) => {
                let sizes = self.fetch_sizes(photo_id).await?;
                Ok(Some(row.into_metadata(sizes)))
            }
            None => Ok(None),
        }
    }

    async fn get_by_owner(&self, owner: &str) -> MetadataResult<Vec<PhotoMetadata>> {
        debug!("retrieving metadata for all photos belonging to {}", owner);
        let rows = sqlx::query_as::<_, PhotoRow>(
            "SELECT id, owner, filename, mime_type, description, uploaded_at
             FROM photos WHERE owner = ?
             ORDER BY uploaded_at ASC, id ASC",
        )
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;

        let size_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT s.photo_id, s.size_name
             FROM photo_sizes s JOIN photos p ON p.id = s.photo_id
             WHERE p.owner = ?",
        )
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;

        let mut sizes: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (photo_id, size_name) in size_rows {
            sizes.entry(photo_id).or_default().insert(size_name);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let photo_sizes = sizes.remove(&row.id).unwrap_or_default();
                row.into_metadata(photo_sizes)
            })
            .collect())
    }

    async fn put(&self, metadata: &PhotoMetadata) -> MetadataResult<bool> {
        debug!(
            "storing metadata for user {}, photo {}",
            metadata.owner, metadata.id
        );
        if !metadata.is_valid() {
            warn!("store called with invalid metadata: {:?}", metadata);
            return Ok(false);
        }

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO photos (id, owner, filename, mime_type, description, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                filename = excluded.filename,
                mime_type = excluded.mime_type,
                description = excluded.description,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(&metadata.id)
        .bind(&metadata.owner)
        .bind(&metadata.filename)
        .bind(&metadata.mime_type)
        .bind(&metadata.description)
        .bind(metadata.uploaded_at)
        .execute(&mut *tx)
        .await?;

        // overlapping runs each write the sizes they saw; never shrink the set
        for size_name in &metadata.sizes {
            sqlx::query(
                "INSERT OR IGNORE INTO photo_sizes (photo_id, size_name) VALUES (?, ?)",
            )
            .bind(&metadata.id)
            .bind(size_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, photo_id: &str) -> MetadataResult<()> {
        debug!("deleting metadata for photo {}", photo_id);
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM photo_sizes WHERE photo_id = ?")
            .bind(photo_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(photo_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Run the embedded schema statements. Safe to repeat.
pub async fn run_migrations(db: &SqlitePool) -> MetadataResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
