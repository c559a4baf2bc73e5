//! Screen geometry: reference frames, device profiles, remapping and jitter.

mod frame;
mod jitter;
mod profile;
mod remap;

pub use frame::{
    AspectMismatchWarning, Letterbox, NominalFrame, NormalizedPoint, PixelPoint,
    DEFAULT_NOMINAL_HEIGHT, DEFAULT_NOMINAL_WIDTH,
};
pub use jitter::{
    jitter_duration, jitter_point, JitterDistribution, JitterPolicy, DEFAULT_DURATION_FRACTION,
    DEFAULT_MAX_FRACTION, DURATION_FRACTION_LIMIT, MAX_FRACTION_LIMIT,
};
pub use profile::{
    DeviceProfile, DisplayMetrics, ProfileConfig, ProfileError, UnsafeRegion, NAV_BAR_DP,
    STATUS_BAR_DP,
};
pub(crate) use frame::aspect_ratio;
pub use remap::{Remapped, Remapper, DEFAULT_ASPECT_TOLERANCE};
