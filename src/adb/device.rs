//! [`Device`] implementation backed by the `adb` command line tool.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use crate::device::{Device, DeviceError, KeyCode, ScreenFrame};
use crate::geometry::{DisplayMetrics, PixelPoint};

use super::{input, screenshot};

/// Pause between the two taps of a double tap.
const DOUBLE_TAP_GAP: Duration = Duration::from_millis(100);

/// stderr fragments meaning the device is gone rather than busy.
const DISCONNECT_PATTERNS: [&str; 5] = [
    "device not found",
    "device offline",
    "no devices/emulators found",
    "no devices found",
    "device unauthorized",
];

static SIZE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(Physical|Override) size:\s*(\d+)x(\d+)").ok());

static DENSITY_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(Physical|Override) density:\s*(\d+)").ok());

static FOCUS_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:mCurrentFocus|mFocusedApp)=.*?\s([A-Za-z0-9_.]+)/").ok());

/// A phone reached through `adb [-s <id>]`.
///
/// # Example
/// ```rust,no_run
/// use phone_pilot::adb::AdbDevice;
/// use phone_pilot::device::Device;
///
/// let device = AdbDevice::new(Some("emulator-5554".to_string()));
/// let metrics = device.display_metrics()?;
/// println!("{}x{}", metrics.width, metrics.height);
/// # Ok::<(), phone_pilot::device::DeviceError>(())
/// ```
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: String,
    device_id: Option<String>,
    keyboard_delay: Duration,
}

impl AdbDevice {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            adb_path: "adb".to_string(),
            device_id,
            keyboard_delay: input::DEFAULT_KEYBOARD_DELAY,
        }
    }

    pub fn with_adb_path(mut self, adb_path: impl Into<String>) -> Self {
        self.adb_path = adb_path.into();
        self
    }

    /// Pause between the steps of text entry (IME switch, clear, type).
    pub fn with_keyboard_delay(mut self, delay: Duration) -> Self {
        self.keyboard_delay = delay;
        self
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub(crate) fn keyboard_delay(&self) -> Duration {
        self.keyboard_delay
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.adb_path);
        if let Some(id) = &self.device_id {
            command.args(["-s", id]);
        }
        command
    }

    /// Run adb and return its raw output, failing only on disconnection.
    pub(crate) fn exec(&self, args: &[&str]) -> Result<Output, DeviceError> {
        let output = self
            .command()
            .args(args)
            .output()
            .map_err(|e| DeviceError::Disconnected(format!("cannot run adb: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_disconnect(&stderr) {
            return Err(DeviceError::Disconnected(stderr.trim().to_string()));
        }
        Ok(output)
    }

    /// Run adb, treating a non-zero exit as a failure, and return stdout.
    pub(crate) fn run(&self, args: &[&str]) -> Result<String, DeviceError> {
        let output = self.exec(args)?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub(crate) fn shell(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.run(&full)
    }

    fn input(&self, args: &[&str]) -> Result<(), DeviceError> {
        let mut full = vec!["input"];
        full.extend_from_slice(args);
        let stdout = self.shell(&full)?;
        // `input` reports bad arguments on stdout with a zero exit code.
        if stdout.contains("Error:") || stdout.contains("Exception") {
            return Err(DeviceError::Rejected(stdout.trim().to_string()));
        }
        Ok(())
    }
}

impl Device for AdbDevice {
    fn screenshot(&self) -> Result<ScreenFrame, DeviceError> {
        screenshot::capture(self)
    }

    fn tap(&self, point: PixelPoint) -> Result<(), DeviceError> {
        self.input(&["tap", &point.x.to_string(), &point.y.to_string()])
    }

    fn double_tap(&self, point: PixelPoint) -> Result<(), DeviceError> {
        self.tap(point)?;
        thread::sleep(DOUBLE_TAP_GAP);
        self.tap(point)
    }

    fn long_press(&self, point: PixelPoint, duration_ms: u64) -> Result<(), DeviceError> {
        let (x, y) = (point.x.to_string(), point.y.to_string());
        self.input(&["swipe", &x, &y, &x, &y, &duration_ms.to_string()])
    }

    fn swipe(&self, start: PixelPoint, end: PixelPoint, duration_ms: u64) -> Result<(), DeviceError> {
        self.input(&[
            "swipe",
            &start.x.to_string(),
            &start.y.to_string(),
            &end.x.to_string(),
            &end.y.to_string(),
            &duration_ms.to_string(),
        ])
    }

    fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        input::type_with_adb_keyboard(self, text)
    }

    fn key_event(&self, key: KeyCode) -> Result<(), DeviceError> {
        self.input(&["keyevent", &key.code().to_string()])
    }

    fn launch(&self, package: &str) -> Result<(), DeviceError> {
        let stdout = self.shell(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])?;
        if stdout.contains("No activities found") {
            return Err(DeviceError::Rejected(format!(
                "no launchable activity in {}",
                package
            )));
        }
        Ok(())
    }

    fn current_package(&self) -> Option<String> {
        let stdout = self.shell(&["dumpsys", "window"]).ok()?;
        parse_focused_package(&stdout)
    }

    fn display_metrics(&self) -> Result<DisplayMetrics, DeviceError> {
        let size = self.shell(&["wm", "size"])?;
        let (width, height) = parse_wm_size(&size)
            .ok_or_else(|| DeviceError::Rejected(format!("unexpected `wm size` output: {}", size.trim())))?;
        let metrics = DisplayMetrics::new(width, height);

        match self.shell(&["wm", "density"]).ok().as_deref().and_then(parse_wm_density) {
            Some(dpi) => Ok(metrics.with_density(dpi)),
            None => Ok(metrics),
        }
    }
}

fn is_disconnect(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    DISCONNECT_PATTERNS.iter().any(|p| lower.contains(p))
        || (lower.contains("device '") && lower.contains("' not found"))
}

/// Map the stderr of a failed adb call to a device error.
pub(crate) fn classify_failure(stderr: &str) -> DeviceError {
    let message = stderr.trim();
    if is_disconnect(message) {
        DeviceError::Disconnected(message.to_string())
    } else if message.is_empty() {
        DeviceError::Rejected("adb exited with an error".to_string())
    } else {
        DeviceError::Rejected(message.to_string())
    }
}

/// Screen size from `wm size`; an override size wins over the physical one.
fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let re = SIZE_RE.as_ref()?;
    let mut physical = None;
    for caps in re.captures_iter(output) {
        let size = (caps[2].parse().ok()?, caps[3].parse().ok()?);
        if &caps[1] == "Override" {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

fn parse_wm_density(output: &str) -> Option<u32> {
    let re = DENSITY_RE.as_ref()?;
    let mut physical = None;
    for caps in re.captures_iter(output) {
        let dpi = caps[2].parse().ok()?;
        if &caps[1] == "Override" {
            return Some(dpi);
        }
        physical = Some(dpi);
    }
    physical
}

fn parse_focused_package(dumpsys: &str) -> Option<String> {
    let re = FOCUS_RE.as_ref()?;
    dumpsys
        .lines()
        .filter(|line| line.contains("mCurrentFocus") || line.contains("mFocusedApp"))
        .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
}
