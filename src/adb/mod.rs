//! ADB (Android Debug Bridge) transport.

mod connection;
mod device;
pub mod input;
mod screenshot;

pub use connection::{parse_device_list, ADBConnection, AdbError, ConnectionType, DeviceInfo};
pub use device::AdbDevice;
pub use input::{ADB_KEYBOARD_IME, DEFAULT_KEYBOARD_DELAY};
