//! Physical screen description established once per session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::{aspect_ratio, PixelPoint};

/// Android status bar height in density-independent pixels.
pub const STATUS_BAR_DP: u32 = 24;

/// Android gesture/navigation bar height in density-independent pixels.
pub const NAV_BAR_DP: u32 = 48;

/// Baseline density Android uses for 1dp == 1px.
const BASELINE_DPI: u32 = 160;

/// Profile construction errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("Invalid screen size {0}x{1}")]
    InvalidSize(u32, u32),
    #[error("Unsafe regions cover the whole screen (height {0})")]
    NoSafeArea(u32),
}

/// Raw display measurements reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    /// Screen density in dots per inch, when the device reports it.
    pub density_dpi: Option<u32>,
}

impl DisplayMetrics {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            density_dpi: None,
        }
    }

    pub fn with_density(mut self, density_dpi: u32) -> Self {
        self.density_dpi = Some(density_dpi);
        self
    }

    /// Convert density-independent pixels to physical pixels.
    ///
    /// Without a known density this assumes a typical 420dpi phone.
    pub fn dp_to_px(&self, dp: u32) -> u32 {
        let dpi = self.density_dpi.unwrap_or(420);
        ((dp as f64) * dpi as f64 / BASELINE_DPI as f64).round() as u32
    }
}

/// How unsafe bands are sized when building a [`DeviceProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Explicit status bar height in pixels (derived from density if `None`).
    pub status_bar_px: Option<u32>,
    /// Explicit navigation bar height in pixels (derived from density if `None`).
    pub nav_bar_px: Option<u32>,
}

impl ProfileConfig {
    pub fn with_status_bar(mut self, px: u32) -> Self {
        self.status_bar_px = Some(px);
        self
    }

    pub fn with_nav_bar(mut self, px: u32) -> Self {
        self.nav_bar_px = Some(px);
        self
    }
}

/// A horizontal pixel band `[top, bottom)` that gestures must avoid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsafeRegion {
    pub name: String,
    pub top: i32,
    pub bottom: i32,
}

impl UnsafeRegion {
    pub fn new(name: impl Into<String>, top: i32, bottom: i32) -> Self {
        Self {
            name: name.into(),
            top,
            bottom,
        }
    }

    /// Whether the row `y` falls inside the band.
    pub fn contains_y(&self, y: i32) -> bool {
        y >= self.top && y < self.bottom
    }

    /// The band grown by `margin` rows on both edges.
    pub fn expanded(&self, margin: i32) -> Self {
        Self {
            name: self.name.clone(),
            top: self.top - margin,
            bottom: self.bottom + margin,
        }
    }
}

/// Physical resolution plus unsafe bands of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub width: u32,
    pub height: u32,
    pub unsafe_regions: Vec<UnsafeRegion>,
}

impl DeviceProfile {
    /// Create a profile with explicit unsafe regions.
    pub fn new(
        width: u32,
        height: u32,
        unsafe_regions: Vec<UnsafeRegion>,
    ) -> Result<Self, ProfileError> {
        if width == 0 || height == 0 {
            return Err(ProfileError::InvalidSize(width, height));
        }
        let profile = Self {
            width,
            height,
            unsafe_regions,
        };
        if !(0..height as i32).any(|y| profile.is_safe_row(y)) {
            return Err(ProfileError::NoSafeArea(height));
        }
        Ok(profile)
    }

    /// Profile with a status bar at the top and a navigation bar at the bottom.
    pub fn with_system_bars(
        width: u32,
        height: u32,
        status_bar_px: u32,
        nav_bar_px: u32,
    ) -> Result<Self, ProfileError> {
        let mut regions = Vec::new();
        if status_bar_px > 0 {
            regions.push(UnsafeRegion::new("status_bar", 0, status_bar_px as i32));
        }
        if nav_bar_px > 0 {
            let top = height.saturating_sub(nav_bar_px) as i32;
            regions.push(UnsafeRegion::new("navigation_bar", top, height as i32));
        }
        Self::new(width, height, regions)
    }

    /// Build a profile from device metrics, sizing bars from `config` or the density.
    pub fn from_metrics(
        metrics: &DisplayMetrics,
        config: &ProfileConfig,
    ) -> Result<Self, ProfileError> {
        let status = config
            .status_bar_px
            .unwrap_or_else(|| metrics.dp_to_px(STATUS_BAR_DP));
        let nav = config
            .nav_bar_px
            .unwrap_or_else(|| metrics.dp_to_px(NAV_BAR_DP));
        Self::with_system_bars(metrics.width, metrics.height, status, nav)
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        aspect_ratio(self.width, self.height)
    }

    /// Whether `point` is a valid pixel on this screen.
    pub fn contains(&self, point: PixelPoint) -> bool {
        point.x >= 0 && point.y >= 0 && point.x < self.width as i32 && point.y < self.height as i32
    }

    /// Whether row `y` lies outside every unsafe region.
    pub fn is_safe_row(&self, y: i32) -> bool {
        !self.unsafe_regions.iter().any(|r| r.contains_y(y))
    }

    /// Clamp a point into `[0, width) x [0, height)`.
    pub fn clamp(&self, point: PixelPoint) -> PixelPoint {
        PixelPoint::new(
            point.x.clamp(0, self.width as i32 - 1),
            point.y.clamp(0, self.height as i32 - 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dp_to_px() {
        let metrics = DisplayMetrics::new(1080, 2400).with_density(480);
        assert_eq!(metrics.dp_to_px(24), 72);
        assert_eq!(metrics.dp_to_px(48), 144);
    }

    #[test]
    fn test_from_metrics_uses_explicit_bars() {
        let metrics = DisplayMetrics::new(720, 1604).with_density(320);
        let config = ProfileConfig::default().with_status_bar(40);
        let profile = DeviceProfile::from_metrics(&metrics, &config).unwrap();

        assert_eq!(profile.unsafe_regions.len(), 2);
        assert_eq!(profile.unsafe_regions[0], UnsafeRegion::new("status_bar", 0, 40));
        // 48dp at 320dpi
        assert_eq!(
            profile.unsafe_regions[1],
            UnsafeRegion::new("navigation_bar", 1508, 1604)
        );
    }

    #[test]
    fn test_zero_bars_produce_no_regions() {
        let profile = DeviceProfile::with_system_bars(720, 1604, 0, 0).unwrap();
        assert!(profile.unsafe_regions.is_empty());
        assert!(profile.is_safe_row(0));
    }

    #[test]
    fn test_invalid_profiles() {
        assert_eq!(
            DeviceProfile::with_system_bars(0, 100, 0, 0),
            Err(ProfileError::InvalidSize(0, 100))
        );
        assert_eq!(
            DeviceProfile::with_system_bars(100, 100, 60, 40),
            Err(ProfileError::NoSafeArea(100))
        );
    }

    #[test]
    fn test_clamp_and_contains() {
        let profile = DeviceProfile::with_system_bars(720, 1604, 40, 0).unwrap();
        assert!(profile.contains(PixelPoint::new(719, 1603)));
        assert!(!profile.contains(PixelPoint::new(720, 10)));
        assert_eq!(
            profile.clamp(PixelPoint::new(-5, 2000)),
            PixelPoint::new(0, 1603)
        );
        assert!(!profile.is_safe_row(39));
        assert!(profile.is_safe_row(40));
    }
}
