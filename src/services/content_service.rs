//! src/services/content_service.rs
//!
//! Content store for photo bytes on local disk. Permanent content is sharded
//! beneath `base_path/{shard}/{shard}/{photoId}/{SIZE}`; staged uploads sit
//! flat in `upload_path/{photoId}` until the resizer moves them.

use crate::models::size::{ORIGINAL, SizeSpec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_PHOTO_ID_LEN: usize = 255;
const CONTENT_TYPE_SUFFIX: &str = ".content-type";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("no staged upload for photo `{0}`")]
    StagedNotFound(String),
    #[error("invalid photo id")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ContentResult<T> = Result<T, ContentError>;

/// Bytes stream accepted by [`ContentStore::stage`].
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Stored bytes plus the content-type tag written with them.
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Get/put/move of photo bytes keyed by `(photoId, size)`.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Returns `None` when nothing is stored for that size.
    async fn get(&self, photo_id: &str, size: &SizeSpec) -> ContentResult<Option<StoredContent>>;

    /// Stores (or overwrites) the bytes for one size.
    async fn put(
        &self,
        photo_id: &str,
        size: &SizeSpec,
        mime_type: &str,
        content: Bytes,
    ) -> ContentResult<()>;

    /// Relocates the staged upload into the permanent `ORIGINAL` slot and
    /// deletes the staged copy.
    async fn move_staged(&self, photo_id: &str, mime_type: &str) -> ContentResult<()>;

    /// Writes an upload into the staging area.
    async fn stage(&self, photo_id: &str, stream: ByteStream) -> ContentResult<u64>;

    /// Removes every stored size and any staged upload for the photo.
    async fn delete(&self, photo_id: &str) -> ContentResult<()>;
}

/// Disk-backed [`ContentStore`].
#[derive(Clone, Debug)]
pub struct FsContentStore {
    /// Root of permanent content.
    pub base_path: PathBuf,

    /// Root of staged uploads.
    pub upload_path: PathBuf,
}

impl FsContentStore {
    pub fn new(base_path: impl Into<PathBuf>, upload_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            upload_path: upload_path.into(),
        }
    }

    /// Photo ids become path components, so reject anything that could
    /// escape its directory.
    fn ensure_photo_id_safe(photo_id: &str) -> ContentResult<()> {
        if photo_id.is_empty() || photo_id.len() > MAX_PHOTO_ID_LEN {
            return Err(ContentError::InvalidKey);
        }
        // leading dots would collide with temp files
        if photo_id.starts_with('.') || photo_id.contains("..") {
            return Err(ContentError::InvalidKey);
        }
        if photo_id
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(ContentError::InvalidKey);
        }
        Ok(())
    }

    /// Two-level shard from MD5(photoId).
    fn photo_shards(photo_id: &str) -> (String, String) {
        let digest = md5::compute(photo_id);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn photo_dir(&self, photo_id: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::photo_shards(photo_id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(photo_id);
        path
    }

    fn content_path(&self, photo_id: &str, size: &SizeSpec) -> PathBuf {
        self.photo_dir(photo_id).join(size.name)
    }

    fn content_type_path(&self, photo_id: &str, size: &SizeSpec) -> PathBuf {
        self.photo_dir(photo_id)
            .join(format!("{}{}", size.name, CONTENT_TYPE_SUFFIX))
    }

    fn staged_path(&self, photo_id: &str) -> PathBuf {
        self.upload_path.join(photo_id)
    }

    /// Write a temp file next to `target`, fsync it, then rename into place.
    async fn write_atomic(target: &Path, content: &[u8]) -> ContentResult<()> {
        let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
            ContentError::Io(io::Error::new(
                ErrorKind::Other,
                "content path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, target).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ContentError::Io(err));
        }
        Ok(())
    }

    /// Recursively remove empty directories up to `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn get(&self, photo_id: &str, size: &SizeSpec) -> ContentResult<Option<StoredContent>> {
        Self::ensure_photo_id_safe(photo_id)?;
        debug!("retrieving content for photo {}, size {}", photo_id, size.name);

        let data = match fs::read(self.content_path(photo_id, size)).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("photo {} size {} does not exist", photo_id, size.name);
                return Ok(None);
            }
            Err(err) => return Err(ContentError::Io(err)),
        };

        let content_type = match fs::read_to_string(self.content_type_path(photo_id, size)).await
        {
            Ok(value) => Some(value.trim().to_string()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(ContentError::Io(err)),
        };

        debug!("retrieved {} bytes for photo {}", data.len(), photo_id);
        Ok(Some(StoredContent {
            content_type,
            data: Bytes::from(data),
        }))
    }

    async fn put(
        &self,
        photo_id: &str,
        size: &SizeSpec,
        mime_type: &str,
        content: Bytes,
    ) -> ContentResult<()> {
        Self::ensure_photo_id_safe(photo_id)?;
        debug!(
            "storing photo {}, size = {}, content-length = {}",
            photo_id,
            size.name,
            content.len()
        );

        Self::write_atomic(&self.content_path(photo_id, size), &content).await?;
        Self::write_atomic(
            &self.content_type_path(photo_id, size),
            mime_type.as_bytes(),
        )
        .await
    }

    async fn move_staged(&self, photo_id: &str, mime_type: &str) -> ContentResult<()> {
        Self::ensure_photo_id_safe(photo_id)?;
        let staged = self.staged_path(photo_id);
        let target = self.content_path(photo_id, &ORIGINAL);

        if !fs::try_exists(&staged).await? {
            // an earlier run moved it but never recorded the move
            if fs::try_exists(&target).await? {
                debug!("photo {} already moved out of staging", photo_id);
                return Ok(());
            }
            return Err(ContentError::StagedNotFound(photo_id.to_string()));
        }

        debug!(
            "moving staged upload {} to {}",
            staged.display(),
            target.display()
        );
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(err) = fs::rename(&staged, &target).await {
            // a concurrent run for the same photo got there first
            if !fs::try_exists(&staged).await? && fs::try_exists(&target).await? {
                debug!("photo {} moved concurrently", photo_id);
                return Ok(());
            }
            // rename fails across filesystems; fall back to copy + delete
            debug!("rename failed ({}), copying instead", err);
            let data = fs::read(&staged).await?;
            Self::write_atomic(&target, &data).await?;
            fs::remove_file(&staged).await?;
        }

        Self::write_atomic(
            &self.content_type_path(photo_id, &ORIGINAL),
            mime_type.as_bytes(),
        )
        .await
    }

    async fn stage(&self, photo_id: &str, mut stream: ByteStream) -> ContentResult<u64> {
        Self::ensure_photo_id_safe(photo_id)?;
        fs::create_dir_all(&self.upload_path).await?;
        let staged = self.staged_path(photo_id);
        let tmp_path = self.upload_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ContentError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ContentError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ContentError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ContentError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &staged).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ContentError::Io(err));
        }

        debug!("staged {} bytes for photo {}", size_bytes, photo_id);
        Ok(size_bytes)
    }

    async fn delete(&self, photo_id: &str) -> ContentResult<()> {
        Self::ensure_photo_id_safe(photo_id)?;
        let photo_dir = self.photo_dir(photo_id);
        match fs::remove_dir_all(&photo_dir).await {
            Ok(_) => debug!("removed content directory {}", photo_dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("content directory {} already missing", photo_dir.display());
            }
            Err(err) => return Err(ContentError::Io(err)),
        }

        if let Some(parent) = photo_dir.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }

        match fs::remove_file(self.staged_path(photo_id)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ContentError::Io(err)),
        }
    }
}
