//! ADB server helpers: listing and connecting devices.

use std::process::Command;
use thiserror::Error;

/// How a device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Usb,
    /// TCP/IP connection, e.g. `192.168.1.100:5555`.
    Remote,
    Emulator,
}

/// One entry of `adb devices -l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    /// `device`, `offline`, `unauthorized` and so on.
    pub status: String,
    pub connection_type: ConnectionType,
    pub model: Option<String>,
}

impl DeviceInfo {
    /// Whether the device accepts commands.
    pub fn is_ready(&self) -> bool {
        self.status == "device"
    }
}

/// ADB server errors.
#[derive(Error, Debug)]
pub enum AdbError {
    #[error("Failed to run adb: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Talks to the local ADB server.
///
/// # Example
/// ```rust,no_run
/// use phone_pilot::adb::ADBConnection;
///
/// let conn = ADBConnection::new();
/// conn.connect("192.168.1.100:5555").ok();
/// for device in conn.list_devices().unwrap_or_default() {
///     println!("{} {}", device.device_id, device.status);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ADBConnection {
    adb_path: String,
}

impl Default for ADBConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ADBConnection {
    pub fn new() -> Self {
        Self::with_path("adb")
    }

    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    /// Connect to a device over TCP/IP. Port 5555 is assumed when missing.
    pub fn connect(&self, address: &str) -> Result<String, AdbError> {
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:5555", address)
        };

        let output = Command::new(&self.adb_path)
            .args(["connect", &address])
            .output()?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let lower = combined.to_lowercase();

        if lower.contains("connected to") || lower.contains("already connected") {
            tracing::info!("Connected to {}", address);
            Ok(address)
        } else {
            Err(AdbError::Connection(combined.trim().to_string()))
        }
    }

    /// Disconnect one remote device, or all when `address` is `None`.
    pub fn disconnect(&self, address: Option<&str>) -> Result<String, AdbError> {
        let mut command = Command::new(&self.adb_path);
        command.arg("disconnect");
        if let Some(addr) = address {
            command.arg(addr);
        }
        let output = command.output()?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// List attached devices.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, AdbError> {
        let output = Command::new(&self.adb_path)
            .args(["devices", "-l"])
            .output()?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse the output of `adb devices -l`.
pub fn parse_device_list(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device_id = parts.next()?.to_string();
            let status = parts.next()?.to_string();
            let model = parts
                .find_map(|p| p.strip_prefix("model:"))
                .map(str::to_string);

            let connection_type = if device_id.starts_with("emulator-") {
                ConnectionType::Emulator
            } else if device_id.contains(':') {
                ConnectionType::Remote
            } else {
                ConnectionType::Usb
            };

            Some(DeviceInfo {
                device_id,
                status,
                connection_type,
                model,
            })
        })
        .collect()
}
