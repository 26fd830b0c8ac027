//! Resizer - turns a staged upload into the full catalog of stored sizes.
//!
//! Per photo:
//! 1. Load metadata (absent => stale notification, ignored)
//! 2. Move the staged upload into the `ORIGINAL` slot if not already recorded
//! 3. Decode the original once
//! 4. Render and store every missing size, at most `concurrency` at a time
//! 5. Persist the merged size set with a single metadata write
//!
//! State lives only in `PhotoMetadata::sizes`, so re-running a photo picks up
//! exactly the sizes that are still missing.

use crate::models::{
    photo::PhotoMetadata,
    size::{ORIGINAL, SizeSpec},
};
use crate::services::{
    content_service::{ContentError, ContentStore},
    derivative::{DerivativeError, DerivativeGenerator},
    metadata_service::{MetadataError, MetadataStore},
};
use futures::{StreamExt, stream};
use image::DynamicImage;
use serde::Deserialize;
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("photo `{photo_id}`: {what} not found")]
    NotFound {
        photo_id: String,
        what: &'static str,
    },
    #[error("photo `{0}`: metadata rejected as invalid")]
    Validation(String),
    #[error("photo `{photo_id}`: {source}")]
    Decode {
        photo_id: String,
        #[source]
        source: DerivativeError,
    },
    #[error("photo `{photo_id}`: no encoder for mime type `{mime_type}`")]
    EncodingUnsupported { photo_id: String, mime_type: String },
    #[error("photo `{photo_id}`: {source}")]
    Render {
        photo_id: String,
        #[source]
        source: DerivativeError,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Content(#[from] ContentError),
}

impl ResizeError {
    fn from_derivative(photo_id: &str, err: DerivativeError) -> Self {
        let photo_id = photo_id.to_string();
        match err {
            err @ DerivativeError::Decode(_) => ResizeError::Decode {
                photo_id,
                source: err,
            },
            DerivativeError::EncodingUnsupported(mime_type) => {
                ResizeError::EncodingUnsupported {
                    photo_id,
                    mime_type,
                }
            }
            other => ResizeError::Render {
                photo_id,
                source: other,
            },
        }
    }
}

pub type ResizeResult<T> = Result<T, ResizeError>;

/// One record of a trigger delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRef {
    pub photo_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A trigger delivery: one or more photos, in no particular order.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerEvent {
    pub records: Vec<PhotoRef>,
}

/// What happened to a single photo.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// No metadata for the photo; nothing was touched.
    Skipped,
    Processed(ProcessReport),
}

#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Sizes rendered and stored by this run.
    pub generated: Vec<&'static str>,
    /// Sizes attempted by this run that failed; retried on the next run.
    pub failed: Vec<(&'static str, ResizeError)>,
    /// The size set as persisted.
    pub sizes: BTreeSet<String>,
}

/// Tally of a batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Resizer {
    metadata: Arc<dyn MetadataStore>,
    content: Arc<dyn ContentStore>,
    generator: DerivativeGenerator,
    concurrency: usize,
}

impl Resizer {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        content: Arc<dyn ContentStore>,
        generator: DerivativeGenerator,
        concurrency: usize,
    ) -> Self {
        Self {
            metadata,
            content,
            generator,
            concurrency: concurrency.max(1),
        }
    }

    /// Process every photo in a trigger delivery.
    ///
    /// Photos run independently in their own tasks; a failure (or panic) on
    /// one photo is logged here and never stops the others.
    pub async fn process_batch(&self, refs: Vec<PhotoRef>) -> BatchSummary {
        info!("received {} record(s)", refs.len());

        let results = stream::iter(refs)
            .filter_map(|photo_ref| async move {
                if photo_ref.photo_id.trim().is_empty() {
                    warn!(user_id = ?photo_ref.user_id, "ignoring record with blank photo id");
                    None
                } else {
                    Some(photo_ref)
                }
            })
            .map(|photo_ref| {
                let resizer = self.clone();
                async move {
                    let photo_id = photo_ref.photo_id.clone();
                    let joined =
                        tokio::spawn(async move { resizer.process(&photo_ref.photo_id).await })
                            .await;
                    (photo_id, joined)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut summary = BatchSummary::default();
        for (photo_id, joined) in results {
            match joined {
                Ok(Ok(ProcessOutcome::Processed(_))) => summary.processed += 1,
                Ok(Ok(ProcessOutcome::Skipped)) => summary.skipped += 1,
                Ok(Err(err @ ResizeError::NotFound { .. })) => {
                    summary.failed += 1;
                    warn!(photo_id = %photo_id, error = %err, "photo not ready for processing");
                }
                Ok(Err(err)) => {
                    summary.failed += 1;
                    error!(photo_id = %photo_id, error = %err, "photo processing failed");
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(photo_id = %photo_id, error = %err, "photo processing task aborted");
                }
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch complete"
        );
        summary
    }

    /// Bring one photo's stored sizes up to the full catalog.
    ///
    /// Safe to call any number of times. Once the original is in place the
    /// size set is always written back, even when rendering aborts, and the
    /// abort is then returned as the error.
    #[tracing::instrument(skip_all, fields(photo_id = %photo_id))]
    pub async fn process(&self, photo_id: &str) -> ResizeResult<ProcessOutcome> {
        let Some(mut metadata) = self.metadata.get(photo_id).await? else {
            warn!("ignoring notification with no associated metadata");
            return Ok(ProcessOutcome::Skipped);
        };

        info!(owner = %metadata.owner, "processing photo");

        if !metadata.has_size(&ORIGINAL) {
            self.content
                .move_staged(photo_id, &metadata.mime_type)
                .await
                .map_err(|err| match err {
                    ContentError::StagedNotFound(_) => ResizeError::NotFound {
                        photo_id: photo_id.to_string(),
                        what: "staged upload",
                    },
                    other => ResizeError::Content(other),
                })?;
            metadata.add_size(&ORIGINAL);
        }

        let mut report = ProcessReport::default();
        let rendered = self.render_missing(&mut metadata, &mut report).await;

        if !self.metadata.put(&metadata).await? {
            return Err(ResizeError::Validation(photo_id.to_string()));
        }
        report.sizes = metadata.sizes;

        match rendered {
            Ok(()) => {
                info!(
                    generated = report.generated.len(),
                    failed = report.failed.len(),
                    "photo processed"
                );
                Ok(ProcessOutcome::Processed(report))
            }
            Err(err @ ResizeError::NotFound { .. }) => {
                warn!(error = %err, "rendering skipped");
                Err(err)
            }
            Err(err) => {
                error!(error = %err, "rendering aborted");
                Err(err)
            }
        }
    }

    /// Render every catalog size missing from `metadata.sizes`, adding the
    /// ones that succeed. Per-size failures land in `report`; an `Err` means
    /// no size could be attempted.
    async fn render_missing(
        &self,
        metadata: &mut PhotoMetadata,
        report: &mut ProcessReport,
    ) -> ResizeResult<()> {
        let pending = metadata.missing_sizes();
        if pending.is_empty() {
            debug!("all sizes already present");
            return Ok(());
        }

        let photo_id = metadata.id.clone();
        let format = self
            .generator
            .encoder_format(&metadata.mime_type)
            .map_err(|err| ResizeError::from_derivative(&photo_id, err))?;

        let original = self
            .content
            .get(&photo_id, &ORIGINAL)
            .await?
            .ok_or_else(|| ResizeError::NotFound {
                photo_id: photo_id.clone(),
                what: "original content",
            })?;

        let img = self
            .generator
            .decode_blocking(original.data, format)
            .await
            .map_err(|err| ResizeError::from_derivative(&photo_id, err))?;

        // build owned futures up front; the spawned `process` future must be `Send`
        let renders: Vec<_> = pending
            .into_iter()
            .map(|spec| {
                let resizer = self.clone();
                let img = img.clone();
                let mime_type = metadata.mime_type.clone();
                let photo_id = photo_id.clone();
                async move {
                    let result = resizer.render_one(&photo_id, img, spec, mime_type).await;
                    (spec, result)
                }
            })
            .collect();
        let results = stream::iter(renders)
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for (spec, result) in results {
            match result {
                Ok(()) => {
                    metadata.add_size(spec);
                    report.generated.push(spec.name);
                }
                Err(err) => {
                    error!(size = spec.name, error = %err, "failed to render size");
                    report.failed.push((spec.name, err));
                }
            }
        }
        Ok(())
    }

    async fn render_one(
        &self,
        photo_id: &str,
        img: Arc<DynamicImage>,
        spec: &'static SizeSpec,
        mime_type: String,
    ) -> ResizeResult<()> {
        let derivative = self
            .generator
            .generate_blocking(img, spec, mime_type.clone())
            .await
            .map_err(|err| ResizeError::from_derivative(photo_id, err))?;

        self.content
            .put(photo_id, spec, &mime_type, derivative.data)
            .await?;

        debug!(
            size = spec.name,
            width = derivative.width,
            height = derivative.height,
            "stored derivative"
        );
        Ok(())
    }
}
