//! Human-like perturbation of gesture points and timing.
//!
//! Every jittered point stays on screen and outside the profile's unsafe
//! bands. Offsets that would land in a band are reflected back out of it, so
//! the engine never resamples.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::frame::PixelPoint;
use super::profile::{DeviceProfile, UnsafeRegion};

/// Default maximum offset as a fraction of the smaller screen dimension.
pub const DEFAULT_MAX_FRACTION: f64 = 0.01;

/// Default relative perturbation applied to gesture durations.
pub const DEFAULT_DURATION_FRACTION: f64 = 0.1;

/// Largest accepted offset fraction.
pub const MAX_FRACTION_LIMIT: f64 = 0.5;

/// Largest accepted duration fraction.
pub const DURATION_FRACTION_LIMIT: f64 = 0.9;

/// Shape of the offset distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JitterDistribution {
    /// Uniform over the square `[-cap, cap]^2`.
    Uniform,
    /// Normal per axis with `sigma = cap * std_dev_ratio`, truncated at the cap.
    Normal { std_dev_ratio: f64 },
}

impl Default for JitterDistribution {
    fn default() -> Self {
        Self::Uniform
    }
}

/// Configuration of the jitter engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterPolicy {
    /// Offset cap as a fraction of `min(width, height)`.
    pub max_fraction: f64,
    pub distribution: JitterDistribution,
    /// Extra rows kept clear around each unsafe band.
    pub region_margin: i32,
    /// Relative perturbation of swipe and long-press durations.
    pub duration_fraction: f64,
    /// Seed for reproducible runs; fresh entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self {
            max_fraction: DEFAULT_MAX_FRACTION,
            distribution: JitterDistribution::Uniform,
            region_margin: 1,
            duration_fraction: DEFAULT_DURATION_FRACTION,
            seed: None,
        }
    }
}

impl JitterPolicy {
    /// A policy that never moves points or changes durations.
    pub fn disabled() -> Self {
        Self {
            max_fraction: 0.0,
            duration_fraction: 0.0,
            ..Self::default()
        }
    }

    /// Set the offset cap. Non-finite values disable jitter, others are
    /// clamped to `[0, MAX_FRACTION_LIMIT]`.
    pub fn with_max_fraction(mut self, fraction: f64) -> Self {
        self.max_fraction = bounded(fraction, MAX_FRACTION_LIMIT);
        self
    }

    pub fn with_distribution(mut self, distribution: JitterDistribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_duration_fraction(mut self, fraction: f64) -> Self {
        self.duration_fraction = bounded(fraction, DURATION_FRACTION_LIMIT);
        self
    }

    /// Random source for one dispatch.
    ///
    /// Seeded policies mix `salt` (usually the cycle number) into the seed so
    /// consecutive actions differ but a rerun repeats exactly.
    pub fn rng(&self, salt: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            None => StdRng::from_entropy(),
        }
    }

    /// Maximum offset in pixels on `profile`.
    ///
    /// Deserialized policies skip the builders, so the fraction is bounded here
    /// as well.
    pub fn cap_px(&self, profile: &DeviceProfile) -> f64 {
        profile.width.min(profile.height) as f64 * bounded(self.max_fraction, MAX_FRACTION_LIMIT)
    }

    /// Check that the magnitudes are finite and within their limits.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=MAX_FRACTION_LIMIT).contains(&self.max_fraction) {
            return Err(format!(
                "max_fraction {} is outside [0, {}]",
                self.max_fraction, MAX_FRACTION_LIMIT
            ));
        }
        if !(0.0..=DURATION_FRACTION_LIMIT).contains(&self.duration_fraction) {
            return Err(format!(
                "duration_fraction {} is outside [0, {}]",
                self.duration_fraction, DURATION_FRACTION_LIMIT
            ));
        }
        Ok(())
    }
}

/// Clamp `fraction` to `[0, limit]`, mapping NaN and infinities to 0.
fn bounded(fraction: f64, limit: f64) -> f64 {
    if fraction.is_finite() {
        fraction.clamp(0.0, limit)
    } else {
        0.0
    }
}

/// Perturb `point` and keep it on screen and outside unsafe bands.
pub fn jitter_point<R: Rng>(
    point: PixelPoint,
    policy: &JitterPolicy,
    profile: &DeviceProfile,
    rng: &mut R,
) -> PixelPoint {
    let cap = policy.cap_px(profile);
    let (dx, dy) = sample_offset(cap, policy.distribution, rng);
    let moved = PixelPoint::new(
        point.x + dx.round() as i32,
        point.y + dy.round() as i32,
    );

    let regions: Vec<UnsafeRegion> = profile
        .unsafe_regions
        .iter()
        .map(|r| r.expanded(policy.region_margin))
        .collect();

    let y = reflect_out_of_regions(moved.y, &regions, profile.height as i32);
    let mut result = profile.clamp(PixelPoint::new(moved.x, y));

    if regions.iter().any(|r| r.contains_y(result.y)) {
        result.y = nearest_safe_row(result.y, &regions, profile);
    }
    result
}

/// Perturb a gesture duration by up to `duration_fraction` in either direction.
pub fn jitter_duration<R: Rng>(duration_ms: u64, policy: &JitterPolicy, rng: &mut R) -> u64 {
    let fraction = bounded(policy.duration_fraction, DURATION_FRACTION_LIMIT);
    if fraction <= 0.0 || duration_ms == 0 {
        return duration_ms;
    }
    let factor = 1.0 + rng.gen_range(-fraction..=fraction);
    ((duration_ms as f64 * factor).round() as u64).max(1)
}

fn sample_offset<R: Rng>(cap: f64, distribution: JitterDistribution, rng: &mut R) -> (f64, f64) {
    if cap < 0.5 {
        return (0.0, 0.0);
    }
    match distribution {
        JitterDistribution::Uniform => (rng.gen_range(-cap..=cap), rng.gen_range(-cap..=cap)),
        JitterDistribution::Normal { std_dev_ratio } => {
            let sigma = cap * bounded(std_dev_ratio, 100.0);
            let (a, b) = standard_normal_pair(rng);
            ((a * sigma).clamp(-cap, cap), (b * sigma).clamp(-cap, cap))
        }
    }
}

/// Box-Muller transform.
fn standard_normal_pair<R: Rng>(rng: &mut R) -> (f64, f64) {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let radius = (-2.0 * u1.ln()).sqrt();
    let theta = std::f64::consts::TAU * u2;
    (radius * theta.cos(), radius * theta.sin())
}

/// Mirror `y` across the edge of the band it fell into.
///
/// Top-anchored bands reflect downwards, bottom-anchored bands upwards, any
/// other band towards its nearer edge.
fn reflect_out_of_regions(y: i32, regions: &[UnsafeRegion], height: i32) -> i32 {
    let Some(region) = regions.iter().find(|r| r.contains_y(y)) else {
        return y;
    };
    let reflect_down = if region.top <= 0 {
        true
    } else if region.bottom >= height {
        false
    } else {
        region.bottom - y <= y - region.top
    };
    if reflect_down {
        // Row `bottom - 1` maps to `bottom`.
        2 * region.bottom - 1 - y
    } else {
        2 * region.top - 1 - y
    }
}

fn nearest_safe_row(y: i32, regions: &[UnsafeRegion], profile: &DeviceProfile) -> i32 {
    let height = profile.height as i32;
    let safe = |row: i32| row >= 0 && row < height && !regions.iter().any(|r| r.contains_y(row));
    for distance in 1..height {
        if safe(y + distance) {
            return y + distance;
        }
        if safe(y - distance) {
            return y - distance;
        }
    }
    // The margin swallowed every row; fall back to the profile's own bands.
    (0..height)
        .find(|&row| profile.is_safe_row(row))
        .unwrap_or(y)
}
