//! Device abstraction the control loop acts through.
//!
//! The loop never talks to `adb` directly. Anything that can capture the
//! screen and inject touch events implements [`Device`].

mod frame;

pub use frame::{ScreenFrame, FALLBACK_HEIGHT, FALLBACK_WIDTH};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::geometry::{DisplayMetrics, PixelPoint};

/// Device transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device is gone; retrying will not help.
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    /// The device is reachable but refused or failed the command.
    #[error("Device rejected command: {0}")]
    Rejected(String),
}

impl DeviceError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Hardware and navigation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Home,
    Back,
    Enter,
    Delete,
    AppSwitch,
    VolumeUp,
    VolumeDown,
    Power,
    /// Any other Android `KEYCODE_*` value.
    Other(u32),
}

impl KeyCode {
    /// Android key code value.
    pub fn code(&self) -> u32 {
        match self {
            Self::Home => 3,
            Self::Back => 4,
            Self::Power => 26,
            Self::VolumeUp => 24,
            Self::VolumeDown => 25,
            Self::Enter => 66,
            Self::Delete => 67,
            Self::AppSwitch => 187,
            Self::Other(code) => *code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            3 => Self::Home,
            4 => Self::Back,
            24 => Self::VolumeUp,
            25 => Self::VolumeDown,
            26 => Self::Power,
            66 => Self::Enter,
            67 => Self::Delete,
            187 => Self::AppSwitch,
            other => Self::Other(other),
        }
    }

    /// Look up a key by name, accepting `back`, `KEYCODE_BACK` and similar.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let lower = lower.strip_prefix("keycode_").unwrap_or(&lower);
        match lower {
            "home" => Some(Self::Home),
            "back" => Some(Self::Back),
            "enter" => Some(Self::Enter),
            "del" | "delete" | "backspace" => Some(Self::Delete),
            "app_switch" | "recents" => Some(Self::AppSwitch),
            "volume_up" => Some(Self::VolumeUp),
            "volume_down" => Some(Self::VolumeDown),
            "power" => Some(Self::Power),
            _ => None,
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "KEYCODE({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A phone the agent can see and touch.
///
/// All coordinates are physical pixels. Calls are short and blocking.
pub trait Device: Send + Sync {
    fn screenshot(&self) -> Result<ScreenFrame, DeviceError>;

    fn tap(&self, point: PixelPoint) -> Result<(), DeviceError>;

    fn double_tap(&self, point: PixelPoint) -> Result<(), DeviceError>;

    fn long_press(&self, point: PixelPoint, duration_ms: u64) -> Result<(), DeviceError>;

    fn swipe(&self, start: PixelPoint, end: PixelPoint, duration_ms: u64) -> Result<(), DeviceError>;

    /// Type into the focused input field, replacing its content.
    fn type_text(&self, text: &str) -> Result<(), DeviceError>;

    fn key_event(&self, key: KeyCode) -> Result<(), DeviceError>;

    /// Start the launcher activity of `package`.
    fn launch(&self, package: &str) -> Result<(), DeviceError>;

    /// Package name of the foreground app, if it can be determined.
    fn current_package(&self) -> Option<String> {
        None
    }

    /// Physical screen size and density.
    ///
    /// Defaults to the size of a fresh screenshot.
    fn display_metrics(&self) -> Result<DisplayMetrics, DeviceError> {
        let frame = self.screenshot()?;
        Ok(DisplayMetrics::new(frame.width, frame.height))
    }
}

/// Run `op`, retrying exactly once if the device rejected it.
///
/// Disconnections are returned immediately.
pub fn retry_rejected<T, F>(mut op: F) -> Result<T, DeviceError>
where
    F: FnMut() -> Result<T, DeviceError>,
{
    match op() {
        Err(DeviceError::Rejected(reason)) => {
            tracing::warn!("Device rejected command ({}), retrying once", reason);
            op()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_codes() {
        assert_eq!(KeyCode::Back.code(), 4);
        assert_eq!(KeyCode::Home.code(), 3);
        assert_eq!(KeyCode::from_code(4), KeyCode::Back);
        assert_eq!(KeyCode::from_code(999), KeyCode::Other(999));
        assert_eq!(KeyCode::from_name("KEYCODE_HOME"), Some(KeyCode::Home));
        assert_eq!(KeyCode::from_name("Back"), Some(KeyCode::Back));
        assert_eq!(KeyCode::from_name("jump"), None);
    }

    #[test]
    fn test_retry_rejected_retries_once() {
        let mut calls = 0;
        let result: Result<(), DeviceError> = retry_rejected(|| {
            calls += 1;
            Err(DeviceError::Rejected("busy".to_string()))
        });
        assert_eq!(calls, 2);
        assert_eq!(result, Err(DeviceError::Rejected("busy".to_string())));

        let mut calls = 0;
        let result = retry_rejected(|| {
            calls += 1;
            if calls == 1 {
                Err(DeviceError::Rejected("busy".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_retry_rejected_skips_disconnect() {
        let mut calls = 0;
        let result: Result<(), DeviceError> = retry_rejected(|| {
            calls += 1;
            Err(DeviceError::Disconnected("gone".to_string()))
        });
        assert_eq!(calls, 1);
        assert!(result.unwrap_err().is_disconnected());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted in-memory device for unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A command the fake device received.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Command {
        Screenshot,
        Tap(PixelPoint),
        DoubleTap(PixelPoint),
        LongPress(PixelPoint, u64),
        Swipe(PixelPoint, PixelPoint, u64),
        Type(String),
        Key(KeyCode),
        Launch(String),
    }

    pub struct RecordingDevice {
        width: u32,
        height: u32,
        log: Mutex<Vec<Command>>,
        screenshot_errors: Mutex<VecDeque<DeviceError>>,
        action_errors: Mutex<VecDeque<DeviceError>>,
    }

    impl RecordingDevice {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                log: Mutex::new(Vec::new()),
                screenshot_errors: Mutex::new(VecDeque::new()),
                action_errors: Mutex::new(VecDeque::new()),
            }
        }

        /// Queue an error for the next screenshot call.
        pub fn fail_screenshot(self, error: DeviceError) -> Self {
            self.screenshot_errors.lock().unwrap().push_back(error);
            self
        }

        /// Queue an error for the next action call.
        pub fn fail_action(self, error: DeviceError) -> Self {
            self.action_errors.lock().unwrap().push_back(error);
            self
        }

        pub fn commands(&self) -> Vec<Command> {
            self.log.lock().unwrap().clone()
        }

        /// Commands other than screenshots.
        pub fn actions(&self) -> Vec<Command> {
            self.commands()
                .into_iter()
                .filter(|c| *c != Command::Screenshot)
                .collect()
        }

        fn record(&self, command: Command) -> Result<(), DeviceError> {
            if let Some(error) = self.action_errors.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.log.lock().unwrap().push(command);
            Ok(())
        }
    }

    impl Device for RecordingDevice {
        fn screenshot(&self) -> Result<ScreenFrame, DeviceError> {
            if let Some(error) = self.screenshot_errors.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.log.lock().unwrap().push(Command::Screenshot);
            Ok(ScreenFrame::fallback(self.width, self.height, false))
        }

        fn tap(&self, point: PixelPoint) -> Result<(), DeviceError> {
            self.record(Command::Tap(point))
        }

        fn double_tap(&self, point: PixelPoint) -> Result<(), DeviceError> {
            self.record(Command::DoubleTap(point))
        }

        fn long_press(&self, point: PixelPoint, duration_ms: u64) -> Result<(), DeviceError> {
            self.record(Command::LongPress(point, duration_ms))
        }

        fn swipe(&self, start: PixelPoint, end: PixelPoint, duration_ms: u64) -> Result<(), DeviceError> {
            self.record(Command::Swipe(start, end, duration_ms))
        }

        fn type_text(&self, text: &str) -> Result<(), DeviceError> {
            self.record(Command::Type(text.to_string()))
        }

        fn key_event(&self, key: KeyCode) -> Result<(), DeviceError> {
            self.record(Command::Key(key))
        }

        fn launch(&self, package: &str) -> Result<(), DeviceError> {
            self.record(Command::Launch(package.to_string()))
        }

        fn current_package(&self) -> Option<String> {
            Some("com.android.settings".to_string())
        }
    }
}
