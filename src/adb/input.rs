//! Text entry through the ADB Keyboard IME.
//!
//! `input text` cannot carry non-ASCII characters, so text is sent as a
//! base64 broadcast to ADB Keyboard (<https://github.com/senzhk/ADBKeyBoard>),
//! which must be installed on the device.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::thread;
use std::time::Duration;

use crate::device::DeviceError;

use super::device::AdbDevice;

/// IME identifier of ADB Keyboard.
pub const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";

/// Default pause between IME switch, clear and type steps.
pub const DEFAULT_KEYBOARD_DELAY: Duration = Duration::from_millis(500);

/// Switch to ADB Keyboard, clear the field, type `text`, then restore the
/// user's keyboard.
///
/// The original IME is restored even when typing fails.
pub(crate) fn type_with_adb_keyboard(device: &AdbDevice, text: &str) -> Result<(), DeviceError> {
    let original = switch_to_adb_keyboard(device)?;
    let delay = device.keyboard_delay();
    thread::sleep(delay);

    let typed = clear_text(device)
        .and_then(|_| {
            thread::sleep(delay);
            broadcast_text(device, text)
        })
        .map(|_| thread::sleep(delay));

    if let Err(e) = restore_keyboard(device, &original) {
        tracing::warn!("Failed to restore keyboard {}: {}", original, e);
    }
    typed
}

/// Make ADB Keyboard the active IME and return the one it replaced.
fn switch_to_adb_keyboard(device: &AdbDevice) -> Result<String, DeviceError> {
    let current = device
        .shell(&["settings", "get", "secure", "default_input_method"])?
        .trim()
        .to_string();

    if current != ADB_KEYBOARD_IME {
        let out = device.shell(&["ime", "set", ADB_KEYBOARD_IME])?;
        if out.contains("Unknown input method") {
            return Err(DeviceError::Rejected(format!(
                "ADB Keyboard is not installed ({})",
                ADB_KEYBOARD_IME
            )));
        }
        tracing::debug!("Switched IME from {} to ADB Keyboard", current);
    }
    Ok(current)
}

fn clear_text(device: &AdbDevice) -> Result<(), DeviceError> {
    device
        .shell(&["am", "broadcast", "-a", "ADB_CLEAR_TEXT"])
        .map(|_| ())
}

fn broadcast_text(device: &AdbDevice, text: &str) -> Result<(), DeviceError> {
    let payload = encode_payload(text);
    device
        .shell(&["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &payload])
        .map(|_| ())
}

fn restore_keyboard(device: &AdbDevice, ime: &str) -> Result<(), DeviceError> {
    if !needs_restore(ime) {
        return Ok(());
    }
    device.shell(&["ime", "set", ime]).map(|_| ())
}

fn needs_restore(ime: &str) -> bool {
    !ime.is_empty() && ime != "null" && ime != ADB_KEYBOARD_IME
}

fn encode_payload(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_shell_safe_for_unicode() {
        let payload = encode_payload("打开微信 & say \"hi\"");
        assert!(payload
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
        let decoded = STANDARD.decode(payload).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "打开微信 & say \"hi\"");
    }

    #[test]
    fn test_needs_restore() {
        assert!(needs_restore("com.google.android.inputmethod.latin/.LatinIME"));
        assert!(!needs_restore(ADB_KEYBOARD_IME));
        assert!(!needs_restore(""));
        assert!(!needs_restore("null"));
    }
}
