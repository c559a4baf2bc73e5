//! Captured screen frames.

use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbImage};

/// Width of the placeholder frame when the real size is unknown.
pub const FALLBACK_WIDTH: u32 = 1080;

/// Height of the placeholder frame when the real size is unknown.
pub const FALLBACK_HEIGHT: u32 = 2400;

/// One capture of the device screen.
///
/// Owned by a single control-loop cycle and never modified after capture.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    image: DynamicImage,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    /// Set when Android refused the capture (payment pages, DRM content)
    /// and the image is a black placeholder.
    pub is_sensitive: bool,
}

impl ScreenFrame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            image,
            captured_at: Utc::now(),
            is_sensitive: false,
        }
    }

    /// Decode a PNG (or any format `image` recognises) captured from the device.
    pub fn from_encoded(data: &[u8]) -> Result<Self, image::ImageError> {
        image::load_from_memory(data).map(Self::new)
    }

    /// A black frame standing in for a screen that could not be captured.
    pub fn fallback(width: u32, height: u32, is_sensitive: bool) -> Self {
        let black = RgbImage::from_pixel(width.max(1), height.max(1), image::Rgb([0, 0, 0]));
        let mut frame = Self::new(DynamicImage::ImageRgb8(black));
        frame.is_sensitive = is_sensitive;
        frame
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        crate::geometry::aspect_ratio(self.width, self.height)
    }
}
