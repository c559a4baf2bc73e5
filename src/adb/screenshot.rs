//! Screen capture with `adb exec-out screencap -p`.

use crate::device::{DeviceError, ScreenFrame, FALLBACK_HEIGHT, FALLBACK_WIDTH};

use super::device::AdbDevice;

const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Capture the current screen.
///
/// Secure windows (payment pages, DRM video) make `screencap` fail with a
/// status message; those come back as a black frame with `is_sensitive` set
/// so the model can still reason about the situation.
pub(crate) fn capture(device: &AdbDevice) -> Result<ScreenFrame, DeviceError> {
    let output = device.exec(&["exec-out", "screencap", "-p"])?;
    let stderr = String::from_utf8_lossy(&output.stderr);

    if is_secure_refusal(&stderr) {
        tracing::warn!("Screen capture refused, likely a secure window: {}", stderr.trim());
        return Ok(ScreenFrame::fallback(FALLBACK_WIDTH, FALLBACK_HEIGHT, true));
    }
    decode_png(&output.stdout)
}

fn is_secure_refusal(stderr: &str) -> bool {
    stderr.contains("Status: -1") || stderr.contains("Failed")
}

fn decode_png(data: &[u8]) -> Result<ScreenFrame, DeviceError> {
    if data.len() < PNG_MAGIC.len() || &data[..PNG_MAGIC.len()] != PNG_MAGIC {
        tracing::error!("Screenshot is not a PNG ({} bytes)", data.len());
        return Err(DeviceError::Rejected(format!(
            "screencap returned {} bytes without a PNG header",
            data.len()
        )));
    }
    ScreenFrame::from_encoded(data).map_err(|e| {
        tracing::error!("Failed to decode screenshot: {}", e);
        DeviceError::Rejected(format!("undecodable screenshot: {}", e))
    })
}
