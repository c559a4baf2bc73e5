//! Coordinate remapping from the model's nominal frame to device pixels.
//!
//! The mapping is a pure linear scale per axis. Nothing here learns from
//! previous taps: accuracy depends only on the [`DeviceProfile`] measured at
//! session start.

use super::frame::{AspectMismatchWarning, Letterbox, NominalFrame, NormalizedPoint, PixelPoint};
use super::profile::DeviceProfile;

/// Default relative aspect-ratio tolerance before a mismatch is reported.
pub const DEFAULT_ASPECT_TOLERANCE: f64 = 0.05;

/// Result of a remap: the pixel and an optional aspect warning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Remapped {
    pub point: PixelPoint,
    pub warning: Option<AspectMismatchWarning>,
}

/// Maps normalized model coordinates onto a physical screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Remapper {
    frame: NominalFrame,
    aspect_tolerance: f64,
}

impl Default for Remapper {
    fn default() -> Self {
        Self::new(NominalFrame::default())
    }
}

impl Remapper {
    pub fn new(frame: NominalFrame) -> Self {
        Self {
            frame,
            aspect_tolerance: DEFAULT_ASPECT_TOLERANCE,
        }
    }

    pub fn with_aspect_tolerance(mut self, tolerance: f64) -> Self {
        self.aspect_tolerance = tolerance;
        self
    }

    pub fn frame(&self) -> NominalFrame {
        self.frame
    }

    /// Compare the nominal aspect ratio with the device's.
    pub fn check_aspect(&self, profile: &DeviceProfile) -> Option<AspectMismatchWarning> {
        AspectMismatchWarning::check(
            self.frame.aspect_ratio(),
            profile.aspect_ratio(),
            self.aspect_tolerance,
        )
    }

    /// Scale `point` onto the device.
    ///
    /// A coordinate equal to the nominal maximum lands on the last pixel.
    pub fn remap(&self, point: NormalizedPoint, profile: &DeviceProfile) -> Remapped {
        let fx = point.x / self.frame.width as f64;
        let fy = point.y / self.frame.height as f64;
        Remapped {
            point: to_pixel(fx, fy, profile),
            warning: self.check_aspect(profile),
        }
    }

    /// Scale `point` given in a letterboxed frame onto the device.
    ///
    /// Points in the padding are pulled to the nearest content edge.
    pub fn remap_letterboxed(
        &self,
        point: NormalizedPoint,
        profile: &DeviceProfile,
        letterbox: &Letterbox,
    ) -> Remapped {
        let fx = (point.x / self.frame.width as f64 - letterbox.content_x) / letterbox.content_width;
        let fy =
            (point.y / self.frame.height as f64 - letterbox.content_y) / letterbox.content_height;
        if !(0.0..=1.0).contains(&fx) || !(0.0..=1.0).contains(&fy) {
            tracing::debug!("Point {} falls in letterbox padding, pulling to content", point);
        }
        Remapped {
            point: to_pixel(fx.clamp(0.0, 1.0), fy.clamp(0.0, 1.0), profile),
            warning: None,
        }
    }

    /// Inverse of [`Remapper::remap`] for an unclamped pixel.
    pub fn normalize(&self, point: PixelPoint, profile: &DeviceProfile) -> NormalizedPoint {
        NormalizedPoint::new(
            point.x as f64 / profile.width as f64 * self.frame.width as f64,
            point.y as f64 / profile.height as f64 * self.frame.height as f64,
        )
    }
}

fn to_pixel(fx: f64, fy: f64, profile: &DeviceProfile) -> PixelPoint {
    let x = (fx * profile.width as f64).round() as i32;
    let y = (fy * profile.height as f64).round() as i32;
    profile.clamp(PixelPoint::new(x, y))
}
