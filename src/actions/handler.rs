//! Dispatch of parsed directives to a device.
//!
//! Every gesture goes through the same pipeline: remap from the nominal frame
//! to pixels, jitter inside the safe area, then send to the [`Device`].

use rand::rngs::StdRng;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use thiserror::Error;

use super::directive::ActionDirective;
use crate::config::AppRegistry;
use crate::device::{retry_rejected, Device, DeviceError};
use crate::geometry::{
    jitter_duration, jitter_point, DeviceProfile, JitterPolicy, Letterbox, NormalizedPoint,
    PixelPoint, Remapper,
};

/// Long press duration when the model gives none.
pub const DEFAULT_LONG_PRESS_MS: u64 = 1000;

/// Bounds of the distance-derived swipe duration.
pub const MIN_SWIPE_MS: u64 = 500;
pub const MAX_SWIPE_MS: u64 = 2000;

/// Callback type for confirmation requests.
pub type ConfirmationCallback = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Callback type for takeover requests.
pub type TakeoverCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Action dispatch errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("App not found: {0}")]
    UnknownApp(String),
    #[error("`{0}` is not a device action")]
    NotDispatchable(&'static str),
}

/// What happened to a dispatched directive.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The device performed the action.
    Dispatched { summary: String },
    /// Handled without touching the device (notes, operator takeover).
    Handled { summary: String },
    /// The operator refused a sensitive action.
    Declined { message: String },
}

/// Executes device directives.
pub struct ActionHandler {
    remapper: Remapper,
    jitter: JitterPolicy,
    registry: Arc<dyn AppRegistry>,
    confirmation_callback: ConfirmationCallback,
    takeover_callback: TakeoverCallback,
}

impl ActionHandler {
    /// Create a handler with console confirmation and takeover prompts.
    pub fn new(remapper: Remapper, jitter: JitterPolicy, registry: Arc<dyn AppRegistry>) -> Self {
        Self {
            remapper,
            jitter,
            registry,
            confirmation_callback: Box::new(default_confirmation),
            takeover_callback: Box::new(default_takeover),
        }
    }

    pub fn with_confirmation_callback(mut self, callback: ConfirmationCallback) -> Self {
        self.confirmation_callback = callback;
        self
    }

    pub fn with_takeover_callback(mut self, callback: TakeoverCallback) -> Self {
        self.takeover_callback = callback;
        self
    }

    pub fn remapper(&self) -> &Remapper {
        &self.remapper
    }

    /// Execute `directive` on `device`.
    ///
    /// `letterbox` is the padding applied to the screenshot the model saw;
    /// `salt` varies the jitter between cycles of a seeded run.
    pub fn execute(
        &self,
        directive: &ActionDirective,
        device: &dyn Device,
        profile: &DeviceProfile,
        letterbox: Option<&Letterbox>,
        salt: u64,
    ) -> Result<ActionOutcome, ActionError> {
        let mut rng = self.jitter.rng(salt);

        let summary = match directive {
            ActionDirective::Tap { point, confirm } => {
                if let Some(message) = confirm {
                    if !(self.confirmation_callback)(message) {
                        tracing::info!("Sensitive tap declined: {}", message);
                        return Ok(ActionOutcome::Declined {
                            message: message.clone(),
                        });
                    }
                }
                let target = self.locate(*point, profile, letterbox, &mut rng);
                retry_rejected(|| device.tap(target))?;
                format!("tap {}", target)
            }
            ActionDirective::DoubleTap { point } => {
                let target = self.locate(*point, profile, letterbox, &mut rng);
                retry_rejected(|| device.double_tap(target))?;
                format!("double tap {}", target)
            }
            ActionDirective::LongPress { point, duration_ms } => {
                let target = self.locate(*point, profile, letterbox, &mut rng);
                let duration = jitter_duration(
                    duration_ms.unwrap_or(DEFAULT_LONG_PRESS_MS),
                    &self.jitter,
                    &mut rng,
                );
                retry_rejected(|| device.long_press(target, duration))?;
                format!("long press {} for {}ms", target, duration)
            }
            ActionDirective::Swipe {
                start,
                end,
                duration_ms,
            } => {
                let from = self.locate(*start, profile, letterbox, &mut rng);
                let to = self.locate(*end, profile, letterbox, &mut rng);
                let base = duration_ms.unwrap_or_else(|| swipe_duration(from, to));
                let duration = jitter_duration(base, &self.jitter, &mut rng);
                retry_rejected(|| device.swipe(from, to, duration))?;
                format!("swipe {} -> {} in {}ms", from, to, duration)
            }
            ActionDirective::TypeText { content } => {
                retry_rejected(|| device.type_text(content))?;
                format!("type {:?}", content)
            }
            ActionDirective::KeyEvent { code } => {
                retry_rejected(|| device.key_event(*code))?;
                format!("key {}", code)
            }
            ActionDirective::Launch { app } => {
                let package = self
                    .registry
                    .resolve(app)
                    .ok_or_else(|| ActionError::UnknownApp(app.clone()))?
                    .to_string();
                retry_rejected(|| device.launch(&package))?;
                format!("launch {} ({})", app, package)
            }
            ActionDirective::TakeOver { message } => {
                (self.takeover_callback)(message);
                return Ok(ActionOutcome::Handled {
                    summary: format!("operator took over: {}", message),
                });
            }
            ActionDirective::Note { content } => {
                tracing::info!("Note: {}", content);
                return Ok(ActionOutcome::Handled {
                    summary: "noted".to_string(),
                });
            }
            other => return Err(ActionError::NotDispatchable(other.name())),
        };

        tracing::debug!("Dispatched {}", summary);
        Ok(ActionOutcome::Dispatched { summary })
    }

    /// Remap a model point to pixels and jitter it inside the safe area.
    fn locate(
        &self,
        point: NormalizedPoint,
        profile: &DeviceProfile,
        letterbox: Option<&Letterbox>,
        rng: &mut StdRng,
    ) -> PixelPoint {
        let remapped = match letterbox {
            Some(lb) => self.remapper.remap_letterboxed(point, profile, lb),
            None => self.remapper.remap(point, profile),
        };
        if let Some(warning) = remapped.warning {
            tracing::debug!("Remapping {}: {}", point, warning);
        }
        jitter_point(remapped.point, &self.jitter, profile, rng)
    }
}

/// Swipe duration from the pixel distance: `distance^2 / 1000` ms, bounded.
pub fn swipe_duration(start: PixelPoint, end: PixelPoint) -> u64 {
    let dx = (start.x - end.x) as i64;
    let dy = (start.y - end.y) as i64;
    ((dx * dx + dy * dy) as u64 / 1000).clamp(MIN_SWIPE_MS, MAX_SWIPE_MS)
}

/// Ask on the console; anything but `y` declines.
fn default_confirmation(message: &str) -> bool {
    print!("Sensitive operation: {}\nConfirm? (Y/N): ", message);
    let _ = io::stdout().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => line.trim().eq_ignore_ascii_case("y"),
        Err(_) => false,
    }
}

/// Block until the operator presses Enter.
fn default_takeover(message: &str) {
    print!("{}\nPress Enter after completing manual operation...", message);
    let _ = io::stdout().flush();

    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticAppRegistry;
    use crate::device::testing::{Command, RecordingDevice};
    use crate::device::KeyCode;
    use crate::geometry::NominalFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler(jitter: JitterPolicy) -> ActionHandler {
        ActionHandler::new(
            Remapper::new(NominalFrame::new(1000, 1000)),
            jitter,
            Arc::new(StaticAppRegistry::builtin()),
        )
        .with_confirmation_callback(Box::new(|_| true))
        .with_takeover_callback(Box::new(|_| {}))
    }

    fn profile() -> DeviceProfile {
        DeviceProfile::with_system_bars(1080, 2400, 72, 144).unwrap()
    }

    fn tap(x: f64, y: f64) -> ActionDirective {
        ActionDirective::Tap {
            point: NormalizedPoint::new(x, y),
            confirm: None,
        }
    }

    #[test]
    fn test_tap_is_remapped_without_jitter() {
        let device = RecordingDevice::new(1080, 2400);
        let outcome = handler(JitterPolicy::disabled())
            .execute(&tap(500.0, 500.0), &device, &profile(), None, 0)
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Dispatched { .. }));
        assert_eq!(device.actions(), vec![Command::Tap(PixelPoint::new(540, 1200))]);
    }

    #[test]
    fn test_tap_on_status_bar_lands_below_it() {
        let device = RecordingDevice::new(1080, 2400);
        let h = handler(JitterPolicy::default().with_seed(11));
        for salt in 0..20 {
            h.execute(&tap(5.0, 5.0), &device, &profile(), None, salt).unwrap();
        }
        for command in device.actions() {
            match command {
                Command::Tap(p) => assert!(p.y >= 73, "{}", p),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_swipe_duration_from_distance() {
        let device = RecordingDevice::new(1080, 2400);
        let swipe = ActionDirective::Swipe {
            start: NormalizedPoint::new(500.0, 800.0),
            end: NormalizedPoint::new(500.0, 200.0),
            duration_ms: None,
        };
        handler(JitterPolicy::disabled())
            .execute(&swipe, &device, &profile(), None, 0)
            .unwrap();
        // 1440px vertical: 1440^2 / 1000 = 2073 -> capped at 2000.
        assert_eq!(
            device.actions(),
            vec![Command::Swipe(
                PixelPoint::new(540, 1920),
                PixelPoint::new(540, 480),
                2000
            )]
        );
        assert_eq!(swipe_duration(PixelPoint::new(0, 0), PixelPoint::new(10, 10)), 500);
    }

    #[test]
    fn test_declined_confirmation_skips_device() {
        let device = RecordingDevice::new(1080, 2400);
        let h = handler(JitterPolicy::disabled()).with_confirmation_callback(Box::new(|_| false));
        let directive = ActionDirective::Tap {
            point: NormalizedPoint::new(10.0, 500.0),
            confirm: Some("Pay 100".to_string()),
        };
        let outcome = h.execute(&directive, &device, &profile(), None, 0).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Declined {
                message: "Pay 100".to_string()
            }
        );
        assert!(device.actions().is_empty());
    }

    #[test]
    fn test_launch_resolves_package() {
        let device = RecordingDevice::new(1080, 2400);
        let h = handler(JitterPolicy::disabled());
        let launch = ActionDirective::Launch {
            app: "微信".to_string(),
        };
        h.execute(&launch, &device, &profile(), None, 0).unwrap();
        assert_eq!(device.actions(), vec![Command::Launch("com.tencent.mm".to_string())]);

        let unknown = ActionDirective::Launch {
            app: "Nope".to_string(),
        };
        assert_eq!(
            h.execute(&unknown, &device, &profile(), None, 0),
            Err(ActionError::UnknownApp("Nope".to_string()))
        );
    }

    #[test]
    fn test_rejected_command_is_retried_once() {
        let device = RecordingDevice::new(1080, 2400)
            .fail_action(DeviceError::Rejected("busy".to_string()));
        let key = ActionDirective::KeyEvent { code: KeyCode::Back };
        handler(JitterPolicy::disabled())
            .execute(&key, &device, &profile(), None, 0)
            .unwrap();
        assert_eq!(device.actions(), vec![Command::Key(KeyCode::Back)]);
    }

    #[test]
    fn test_takeover_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let device = RecordingDevice::new(1080, 2400);
        let h = handler(JitterPolicy::disabled()).with_takeover_callback(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let outcome = h
            .execute(
                &ActionDirective::TakeOver {
                    message: "Log in".to_string(),
                },
                &device,
                &profile(),
                None,
                0,
            )
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Handled { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(device.actions().is_empty());
    }

    #[test]
    fn test_terminal_directives_are_not_dispatched() {
        let device = RecordingDevice::new(1080, 2400);
        let done = ActionDirective::TaskComplete { result: None };
        assert_eq!(
            handler(JitterPolicy::disabled()).execute(&done, &device, &profile(), None, 0),
            Err(ActionError::NotDispatchable("finish"))
        );
    }

    #[test]
    fn test_letterboxed_tap() {
        let device = RecordingDevice::new(1080, 2400);
        let letterbox = Letterbox::fit(1080, 2400, 1.0);
        handler(JitterPolicy::disabled())
            .execute(&tap(500.0, 500.0), &device, &profile(), Some(&letterbox), 0)
            .unwrap();
        assert_eq!(device.actions(), vec![Command::Tap(PixelPoint::new(540, 1200))]);
    }
}
