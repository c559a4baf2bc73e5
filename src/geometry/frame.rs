//! Points and reference frames shared by the parser, remapper and jitter engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default nominal width the model reports coordinates against.
pub const DEFAULT_NOMINAL_WIDTH: u32 = 1000;

/// Default nominal height the model reports coordinates against.
pub const DEFAULT_NOMINAL_HEIGHT: u32 = 1000;

/// Fixed resolution the model's coordinates are relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NominalFrame {
    pub width: u32,
    pub height: u32,
}

impl Default for NominalFrame {
    fn default() -> Self {
        Self {
            width: DEFAULT_NOMINAL_WIDTH,
            height: DEFAULT_NOMINAL_HEIGHT,
        }
    }
}

impl NominalFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        aspect_ratio(self.width, self.height)
    }

    /// Both sides must be non-zero for remapping to be defined.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Whether `point` lies inside `[0, width] x [0, height]`.
    pub fn contains(&self, point: NormalizedPoint) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x <= self.width as f64
            && point.y <= self.height as f64
    }
}

/// A point in the model's nominal reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for NormalizedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A physical pixel on the device screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for PixelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Padding added around a screenshot so that it matches the nominal aspect ratio.
///
/// All values are fractions of the padded frame, so they apply unchanged to the
/// nominal frame the model answers in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    /// Left edge of the real content.
    pub content_x: f64,
    /// Top edge of the real content.
    pub content_y: f64,
    /// Width of the real content.
    pub content_width: f64,
    /// Height of the real content.
    pub content_height: f64,
}

impl Letterbox {
    /// Letterbox that fits a `width x height` image inside a frame of aspect `target`.
    pub fn fit(width: u32, height: u32, target: f64) -> Self {
        let source = aspect_ratio(width, height);
        if source > target {
            // Wider than the target: pad top and bottom.
            let content_height = target / source;
            Self {
                content_x: 0.0,
                content_y: (1.0 - content_height) / 2.0,
                content_width: 1.0,
                content_height,
            }
        } else {
            let content_width = source / target;
            Self {
                content_x: (1.0 - content_width) / 2.0,
                content_y: 0.0,
                content_width,
                content_height: 1.0,
            }
        }
    }

    /// True when no padding is applied.
    pub fn is_identity(&self) -> bool {
        self.content_width >= 1.0 && self.content_height >= 1.0
    }
}

/// Raised when a frame would have to be stretched to match another frame.
///
/// Non-fatal: mapping continues on a best-effort basis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectMismatchWarning {
    pub expected: f64,
    pub actual: f64,
}

impl AspectMismatchWarning {
    /// Relative difference between the two ratios.
    pub fn deviation(&self) -> f64 {
        relative_difference(self.expected, self.actual)
    }

    /// Build a warning if `actual` deviates from `expected` by more than `tolerance`.
    pub fn check(expected: f64, actual: f64, tolerance: f64) -> Option<Self> {
        if relative_difference(expected, actual) > tolerance {
            Some(Self { expected, actual })
        } else {
            None
        }
    }
}

impl fmt::Display for AspectMismatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "aspect ratio mismatch: expected {:.4}, got {:.4} ({:.1}% off)",
            self.expected,
            self.actual,
            self.deviation() * 100.0
        )
    }
}

pub(crate) fn aspect_ratio(width: u32, height: u32) -> f64 {
    if height == 0 {
        return 0.0;
    }
    width as f64 / height as f64
}

fn relative_difference(expected: f64, actual: f64) -> f64 {
    if expected == 0.0 {
        return if actual == 0.0 { 0.0 } else { f64::INFINITY };
    }
    ((actual - expected) / expected).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_frame_contains() {
        let frame = NominalFrame::new(1000, 1780);
        assert!(frame.contains(NormalizedPoint::new(0.0, 0.0)));
        assert!(frame.contains(NormalizedPoint::new(1000.0, 1780.0)));
        assert!(!frame.contains(NormalizedPoint::new(1000.5, 10.0)));
        assert!(!frame.contains(NormalizedPoint::new(10.0, -1.0)));
    }

    #[test]
    fn test_letterbox_fit_tall_source() {
        // 720x1600 into a square frame: pad left and right.
        let lb = Letterbox::fit(720, 1600, 1.0);
        assert!((lb.content_width - 0.45).abs() < 1e-9);
        assert!((lb.content_x - 0.275).abs() < 1e-9);
        assert_eq!(lb.content_y, 0.0);
        assert!(!lb.is_identity());
    }

    #[test]
    fn test_letterbox_fit_same_aspect() {
        let lb = Letterbox::fit(500, 890, 500.0 / 890.0);
        assert!(lb.is_identity());
    }

    #[test]
    fn test_aspect_warning_check() {
        assert!(AspectMismatchWarning::check(0.5, 0.51, 0.05).is_none());
        let warning = AspectMismatchWarning::check(1.0, 0.45, 0.05).unwrap();
        assert!((warning.deviation() - 0.55).abs() < 1e-9);
        assert!(warning.to_string().contains("aspect ratio mismatch"));
    }
}
