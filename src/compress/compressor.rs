//! Downscale and re-encode screen frames for the model request.
//!
//! The aspect ratio is always preserved. When the model answers in a fixed
//! nominal frame whose aspect differs from the screen, the policy can pad the
//! image (letterbox) instead of stretching it, and records where the real
//! content sits so taps can be mapped back.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::ScreenFrame;
use crate::geometry::{AspectMismatchWarning, Letterbox, NominalFrame, DEFAULT_ASPECT_TOLERANCE};

/// Default cap on the longest edge of the uploaded image.
pub const DEFAULT_MAX_DIMENSION: u32 = 1280;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 85;

/// Quality lost on each degraded retry.
const QUALITY_STEP: u8 = 15;

/// Lowest quality a degraded retry goes down to.
const MIN_QUALITY: u8 = 10;

/// Compression errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressionError {
    #[error("Failed to encode image: {0}")]
    Encode(String),
    #[error("Encoder produced no data")]
    EmptyOutput,
    #[error("Invalid compression policy: {0}")]
    InvalidPolicy(String),
}

/// How screenshots are shrunk before upload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionPolicy {
    /// Longest edge of the output image in pixels.
    pub max_dimension: u32,
    /// JPEG quality, 1 to 100.
    pub quality: u8,
    pub grayscale: bool,
    /// Pad the image to this frame's aspect ratio instead of leaving it as is.
    pub letterbox: Option<NominalFrame>,
    pub aspect_tolerance: f64,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
            grayscale: false,
            letterbox: None,
            aspect_tolerance: DEFAULT_ASPECT_TOLERANCE,
        }
    }
}

impl CompressionPolicy {
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_grayscale(mut self, grayscale: bool) -> Self {
        self.grayscale = grayscale;
        self
    }

    pub fn with_letterbox(mut self, frame: NominalFrame) -> Self {
        self.letterbox = Some(frame);
        self
    }

    /// The same policy one notch cheaper, used after a failed attempt.
    pub fn degraded(&self) -> Self {
        Self {
            quality: self.quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY),
            ..*self
        }
    }

    fn validate(&self) -> Result<(), CompressionError> {
        if self.max_dimension == 0 {
            return Err(CompressionError::InvalidPolicy(
                "max_dimension must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(CompressionError::InvalidPolicy(format!(
                "quality {} outside 1..=100",
                self.quality
            )));
        }
        if let Some(frame) = self.letterbox {
            if frame.width == 0 || frame.height == 0 {
                return Err(CompressionError::InvalidPolicy(
                    "letterbox frame must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Turns the prepared image into upload bytes.
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CompressionError>;
}

/// Baseline JPEG through the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegImageEncoder;

impl ImageEncoder for JpegImageEncoder {
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CompressionError> {
        let mut bytes = Vec::new();
        image
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
            .map_err(|e| CompressionError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

/// An encoded image ready to upload.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Factor applied to the source dimensions (1.0 when not resized).
    pub scale: f64,
    /// Position of the real content when the image was padded.
    pub letterbox: Option<Letterbox>,
    pub warning: Option<AspectMismatchWarning>,
}

impl CompressedImage {
    pub fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Compress `frame` according to `policy`.
pub fn compress(
    frame: &ScreenFrame,
    policy: &CompressionPolicy,
) -> Result<CompressedImage, CompressionError> {
    compress_with_encoder(frame, policy, &JpegImageEncoder)
}

/// Compress `frame` with a specific encoder.
pub fn compress_with_encoder<E: ImageEncoder + ?Sized>(
    frame: &ScreenFrame,
    policy: &CompressionPolicy,
    encoder: &E,
) -> Result<CompressedImage, CompressionError> {
    policy.validate()?;

    let (src_w, src_h) = (frame.width.max(1), frame.height.max(1));
    let padding = policy
        .letterbox
        .map(|nominal| Letterbox::fit(src_w, src_h, nominal.aspect_ratio()))
        .filter(|lb| !lb.is_identity());

    // Canvas in source pixels: the screen plus any padding.
    let (canvas_w, canvas_h) = match padding {
        Some(lb) => (
            (src_w as f64 / lb.content_width).round() as u32,
            (src_h as f64 / lb.content_height).round() as u32,
        ),
        None => (src_w, src_h),
    };

    let longest = canvas_w.max(canvas_h);
    let scale = if longest > policy.max_dimension {
        policy.max_dimension as f64 / longest as f64
    } else {
        1.0
    };

    let content_w = scaled(src_w, scale);
    let content_h = scaled(src_h, scale);
    let content = if scale < 1.0 {
        frame
            .image()
            .resize_exact(content_w, content_h, FilterType::Lanczos3)
    } else {
        frame.image().clone()
    };

    let warning = AspectMismatchWarning::check(
        frame.aspect_ratio(),
        content.width() as f64 / content.height() as f64,
        policy.aspect_tolerance,
    );
    if let Some(w) = &warning {
        tracing::warn!("Compressed screenshot distorted: {}", w);
    }

    let (output, letterbox) = match padding {
        Some(_) => {
            let out_w = scaled(canvas_w, scale).max(content_w);
            let out_h = scaled(canvas_h, scale).max(content_h);
            let offset_x = (out_w - content_w) / 2;
            let offset_y = (out_h - content_h) / 2;
            let mut canvas = RgbImage::from_pixel(out_w, out_h, Rgb([0, 0, 0]));
            image::imageops::overlay(
                &mut canvas,
                &content.to_rgb8(),
                offset_x as i64,
                offset_y as i64,
            );
            let lb = Letterbox {
                content_x: offset_x as f64 / out_w as f64,
                content_y: offset_y as f64 / out_h as f64,
                content_width: content_w as f64 / out_w as f64,
                content_height: content_h as f64 / out_h as f64,
            };
            (DynamicImage::ImageRgb8(canvas), Some(lb))
        }
        None => (content, None),
    };

    let output = if policy.grayscale {
        DynamicImage::ImageLuma8(output.to_luma8())
    } else {
        DynamicImage::ImageRgb8(output.to_rgb8())
    };

    let bytes = encoder.encode(&output, policy.quality)?;
    if bytes.is_empty() {
        return Err(CompressionError::EmptyOutput);
    }

    if scale < 1.0 {
        tracing::debug!(
            "Screenshot resized: {}x{} -> {}x{} (scale {:.3})",
            frame.width,
            frame.height,
            output.width(),
            output.height(),
            scale
        );
    }

    Ok(CompressedImage {
        bytes,
        width: output.width(),
        height: output.height(),
        scale,
        letterbox,
        warning,
    })
}

/// Compress with up to `max_retries` further attempts, each with a degraded policy.
///
/// An invalid policy fails immediately. Exhaustion returns the last error.
pub fn compress_with_retry(
    frame: &ScreenFrame,
    policy: &CompressionPolicy,
    max_retries: u32,
) -> Result<CompressedImage, CompressionError> {
    compress_with_retry_using(frame, policy, max_retries, &JpegImageEncoder)
}

/// [`compress_with_retry`] with a specific encoder.
pub fn compress_with_retry_using<E: ImageEncoder + ?Sized>(
    frame: &ScreenFrame,
    policy: &CompressionPolicy,
    max_retries: u32,
    encoder: &E,
) -> Result<CompressedImage, CompressionError> {
    let mut current = *policy;
    let mut attempt = 0;
    loop {
        match compress_with_encoder(frame, &current, encoder) {
            Ok(image) => return Ok(image),
            Err(e @ CompressionError::InvalidPolicy(_)) => return Err(e),
            Err(e) if attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                current = current.degraded();
                tracing::warn!(
                    "Compression failed ({}), retrying at quality {} ({}/{})",
                    e,
                    current.quality,
                    attempt,
                    max_retries
                );
            }
        }
    }
}

fn scaled(value: u32, scale: f64) -> u32 {
    ((value as f64 * scale).round() as u32).max(1)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Fails a fixed number of times, then encodes JPEG. Records each quality.
    pub struct FlakyEncoder {
        failures: Mutex<u32>,
        qualities: Mutex<Vec<u8>>,
    }

    impl FlakyEncoder {
        pub fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                qualities: Mutex::new(Vec::new()),
            }
        }

        pub fn qualities(&self) -> Vec<u8> {
            self.qualities.lock().unwrap().clone()
        }
    }

    impl ImageEncoder for FlakyEncoder {
        fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CompressionError> {
            self.qualities.lock().unwrap().push(quality);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CompressionError::Encode(format!("quality {} rejected", quality)));
            }
            JpegImageEncoder.encode(image, quality)
        }
    }
}
