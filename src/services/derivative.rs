//! Derivative generator - renders the original image at one catalog size.
//!
//! Decoding is the expensive step, so callers decode once per photo and hand
//! the same image to every size. Both decoding and encoding are CPU-bound;
//! the `*_blocking` variants run them on the blocking thread pool.

use crate::models::size::{self, SizeSpec};
use bytes::Bytes;
use image::{
    DynamicImage, GenericImageView, ImageError, ImageFormat, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use std::{io::Cursor, sync::Arc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DerivativeError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] ImageError),
    #[error("no encoder available for mime type `{0}`")]
    EncodingUnsupported(String),
    #[error("failed to encode {size}: {source}")]
    Encode {
        size: &'static str,
        #[source]
        source: ImageError,
    },
    #[error("size `{0}` is not a scaled size")]
    NotScalable(&'static str),
    #[error("{size} would be {width} x {height}, over the resample memory limit")]
    TooLarge {
        size: &'static str,
        width: u32,
        height: u32,
    },
    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type DerivativeResult<T> = Result<T, DerivativeError>;

/// Configuration for derivative rendering.
#[derive(Clone, Copy, Debug)]
pub struct GeneratorConfig {
    /// Resampling filter. Must not be `Nearest`.
    pub filter: FilterType,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// Upper bound on the pixel buffers a single resize may allocate.
    pub max_resample_bytes: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            // bicubic; the resampler widens the kernel when downscaling,
            // which is what keeps thumbnails free of aliasing
            filter: FilterType::CatmullRom,
            jpeg_quality: 85,
            // same ceiling as the decoders' default `image::Limits::max_alloc`
            max_resample_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One rendered size.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DerivativeGenerator {
    config: GeneratorConfig,
}

impl DerivativeGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Parse the original's bytes as `format`, the type its metadata claims.
    pub fn decode_once(
        &self,
        bytes: &[u8],
        format: ImageFormat,
    ) -> DerivativeResult<DynamicImage> {
        let img =
            image::load_from_memory_with_format(bytes, format).map_err(DerivativeError::Decode)?;
        let (width, height) = img.dimensions();
        debug!(
            original_size = bytes.len(),
            width, height, "decoded original"
        );
        Ok(img)
    }

    /// Resolve the encoder for a photo's recorded mime type.
    pub fn encoder_format(&self, mime_type: &str) -> DerivativeResult<ImageFormat> {
        ImageFormat::from_mime_type(mime_type)
            .filter(ImageFormat::writing_enabled)
            .ok_or_else(|| DerivativeError::EncodingUnsupported(mime_type.to_string()))
    }

    /// Render `img` at `spec`, encoded for `mime_type`.
    ///
    /// Only width is enforced: the height follows the original aspect ratio
    /// (see [`size::scale_for`]), so it may differ from `spec.height`.
    pub fn generate(
        &self,
        img: &DynamicImage,
        spec: &SizeSpec,
        mime_type: &str,
    ) -> DerivativeResult<Derivative> {
        let format = self.encoder_format(mime_type)?;
        let (src_width, src_height) = img.dimensions();
        let (dst_width, dst_height) = size::scale_for(spec, (src_width, src_height))
            .ok_or(DerivativeError::NotScalable(spec.name))?;
        self.check_resample_budget(src_width, dst_width, dst_height, spec)?;

        debug!(
            "resizing to fit {}; actual dimensions are {} x {}",
            spec.description, dst_width, dst_height
        );

        let resized = img.resize_exact(dst_width, dst_height, self.config.filter);
        let data = self.encode(&resized, format, mime_type, spec)?;

        Ok(Derivative {
            data,
            width: dst_width,
            height: dst_height,
        })
    }

    /// [`Self::decode_once`] on the blocking pool.
    pub async fn decode_blocking(
        &self,
        bytes: Bytes,
        format: ImageFormat,
    ) -> DerivativeResult<Arc<DynamicImage>> {
        let generator = *self;
        tokio::task::spawn_blocking(move || generator.decode_once(&bytes, format).map(Arc::new))
            .await?
    }

    /// [`Self::generate`] on the blocking pool.
    pub async fn generate_blocking(
        &self,
        img: Arc<DynamicImage>,
        spec: &'static SizeSpec,
        mime_type: String,
    ) -> DerivativeResult<Derivative> {
        let generator = *self;
        tokio::task::spawn_blocking(move || generator.generate(&img, spec, &mime_type)).await?
    }

    /// Resampling runs in RGBA f32: a `src_width x dst_height` vertical pass,
    /// then the `dst_width x dst_height` output. Tall, narrow originals scale
    /// to enormous heights, so refuse before allocating.
    fn check_resample_budget(
        &self,
        src_width: u32,
        dst_width: u32,
        dst_height: u32,
        spec: &SizeSpec,
    ) -> DerivativeResult<()> {
        const BYTES_PER_PIXEL: u64 = 4 * 4;
        let pixels = (u64::from(src_width) + u64::from(dst_width)) * u64::from(dst_height);
        if pixels.saturating_mul(BYTES_PER_PIXEL) > self.config.max_resample_bytes {
            return Err(DerivativeError::TooLarge {
                size: spec.name,
                width: dst_width,
                height: dst_height,
            });
        }
        Ok(())
    }

    fn encode(
        &self,
        img: &DynamicImage,
        format: ImageFormat,
        mime_type: &str,
        spec: &SizeSpec,
    ) -> DerivativeResult<Bytes> {
        let mut buf = Vec::new();

        let result = match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel and no 16-bit samples
                let img = match img {
                    DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img.clone(),
                    other => DynamicImage::ImageRgb8(other.to_rgb8()),
                };
                img.write_with_encoder(JpegEncoder::new_with_quality(
                    &mut buf,
                    self.config.jpeg_quality,
                ))
            }
            other => img.write_to(&mut Cursor::new(&mut buf), other),
        };

        match result {
            Ok(()) => Ok(Bytes::from(buf)),
            Err(ImageError::Unsupported(_)) => {
                Err(DerivativeError::EncodingUnsupported(mime_type.to_string()))
            }
            Err(source) => Err(DerivativeError::Encode {
                size: spec.name,
                source,
            }),
        }
    }
}
