//! Shared fixtures for unit tests: in-memory metadata, temp-dir content,
//! generated images, and a content store that records and injects writes.

use crate::models::{photo::PhotoMetadata, size::SizeSpec};
use crate::services::{
    content_service::{
        ByteStream, ContentError, ContentResult, ContentStore, FsContentStore, StoredContent,
    },
    derivative::DerivativeGenerator,
    metadata_service::{MetadataStore, SqliteMetadataStore, run_migrations},
    resizer::Resizer,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use image::{DynamicImage, ImageFormat, RgbImage};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::HashSet,
    io::{self, Cursor},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

pub async fn memory_metadata_store() -> SqliteMetadataStore {
    // one connection: every `sqlite::memory:` connection is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    run_migrations(&pool).await.expect("migrate");
    SqliteMetadataStore::new(Arc::new(pool))
}

pub fn encoded_image(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode test image");
    buf
}

/// A gradient JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    encoded_image(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, io::Error>(Bytes::from(chunk))),
    ))
}

/// Disk content store that records successful writes and can fail the next
/// put for chosen sizes.
pub struct RecordingContentStore {
    inner: FsContentStore,
    puts: Mutex<Vec<&'static str>>,
    fail_next: Mutex<HashSet<&'static str>>,
    moves: AtomicUsize,
}

impl RecordingContentStore {
    pub fn new(inner: FsContentStore) -> Self {
        Self {
            inner,
            puts: Mutex::new(Vec::new()),
            fail_next: Mutex::new(HashSet::new()),
            moves: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_put(&self, size: &'static SizeSpec) {
        self.fail_next.lock().unwrap().insert(size.name);
    }

    /// Sizes successfully put, in completion order.
    pub fn puts(&self) -> Vec<&'static str> {
        self.puts.lock().unwrap().clone()
    }

    pub fn clear_puts(&self) {
        self.puts.lock().unwrap().clear();
    }

    pub fn move_count(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    /// Every put plus every staged move.
    pub fn write_count(&self) -> usize {
        self.puts.lock().unwrap().len() + self.move_count()
    }
}

#[async_trait]
impl ContentStore for RecordingContentStore {
    async fn get(&self, photo_id: &str, size: &SizeSpec) -> ContentResult<Option<StoredContent>> {
        self.inner.get(photo_id, size).await
    }

    async fn put(
        &self,
        photo_id: &str,
        size: &SizeSpec,
        mime_type: &str,
        content: Bytes,
    ) -> ContentResult<()> {
        if self.fail_next.lock().unwrap().remove(size.name) {
            return Err(ContentError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected put failure",
            )));
        }
        self.inner.put(photo_id, size, mime_type, content).await?;
        self.puts.lock().unwrap().push(size.name);
        Ok(())
    }

    async fn move_staged(&self, photo_id: &str, mime_type: &str) -> ContentResult<()> {
        self.inner.move_staged(photo_id, mime_type).await?;
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stage(&self, photo_id: &str, stream: ByteStream) -> ContentResult<u64> {
        self.inner.stage(photo_id, stream).await
    }

    async fn delete(&self, photo_id: &str) -> ContentResult<()> {
        self.inner.delete(photo_id).await
    }
}

/// Both stores plus a resizer wired over them.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub metadata: Arc<SqliteMetadataStore>,
    pub content: Arc<RecordingContentStore>,
    pub resizer: Resizer,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let metadata = Arc::new(memory_metadata_store().await);
        let content = Arc::new(RecordingContentStore::new(FsContentStore::new(
            dir.path().join("images"),
            dir.path().join("uploads"),
        )));
        let resizer = Resizer::new(
            metadata.clone(),
            content.clone(),
            DerivativeGenerator::default(),
            2,
        );
        Self {
            dir,
            metadata,
            content,
            resizer,
        }
    }

    /// Create metadata with no sizes and stage `bytes` as its upload.
    pub async fn upload(
        &self,
        photo_id: &str,
        owner: &str,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> PhotoMetadata {
        let meta = PhotoMetadata::new(photo_id, owner, filename, mime_type, None);
        assert!(self.metadata.put(&meta).await.expect("store metadata"));
        self.content
            .stage(photo_id, byte_stream(vec![bytes]))
            .await
            .expect("stage upload");
        meta
    }
}
