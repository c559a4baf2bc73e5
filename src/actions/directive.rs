//! Parsed model intents.

use std::fmt;
use std::time::Duration;

use crate::device::KeyCode;
use crate::geometry::NormalizedPoint;

/// One action the model asked for, in its nominal frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDirective {
    /// Tap a point. `confirm` carries the model's note for sensitive taps,
    /// which must be approved by the operator first.
    Tap {
        point: NormalizedPoint,
        confirm: Option<String>,
    },
    DoubleTap {
        point: NormalizedPoint,
    },
    LongPress {
        point: NormalizedPoint,
        duration_ms: Option<u64>,
    },
    /// Swipe gesture. Without a duration one is derived from the distance.
    Swipe {
        start: NormalizedPoint,
        end: NormalizedPoint,
        duration_ms: Option<u64>,
    },
    TypeText {
        content: String,
    },
    KeyEvent {
        code: KeyCode,
    },
    /// Start an app by display name.
    Launch {
        app: String,
    },
    Wait {
        duration: Duration,
    },
    /// Hand control to the operator (login, captcha, ambiguous choice).
    TakeOver {
        message: String,
    },
    /// Information the model wants recorded; no device effect.
    Note {
        content: String,
    },
    TaskComplete {
        result: Option<String>,
    },
    TaskFailed {
        reason: String,
    },
}

impl ActionDirective {
    /// Short lowercase name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "tap",
            Self::DoubleTap { .. } => "double_tap",
            Self::LongPress { .. } => "long_press",
            Self::Swipe { .. } => "swipe",
            Self::TypeText { .. } => "type",
            Self::KeyEvent { .. } => "key",
            Self::Launch { .. } => "launch",
            Self::Wait { .. } => "wait",
            Self::TakeOver { .. } => "take_over",
            Self::Note { .. } => "note",
            Self::TaskComplete { .. } => "finish",
            Self::TaskFailed { .. } => "fail",
        }
    }

    /// Whether the directive carries screen coordinates.
    pub fn is_gesture(&self) -> bool {
        matches!(
            self,
            Self::Tap { .. } | Self::DoubleTap { .. } | Self::LongPress { .. } | Self::Swipe { .. }
        )
    }
}

impl fmt::Display for ActionDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tap { point, confirm: None } => write!(f, "tap{}", point),
            Self::Tap {
                point,
                confirm: Some(message),
            } => write!(f, "tap{} [confirm: {}]", point, message),
            Self::DoubleTap { point } => write!(f, "double_tap{}", point),
            Self::LongPress { point, duration_ms } => match duration_ms {
                Some(ms) => write!(f, "long_press{} {}ms", point, ms),
                None => write!(f, "long_press{}", point),
            },
            Self::Swipe {
                start,
                end,
                duration_ms,
            } => match duration_ms {
                Some(ms) => write!(f, "swipe{} -> {} {}ms", start, end, ms),
                None => write!(f, "swipe{} -> {}", start, end),
            },
            Self::TypeText { content } => write!(f, "type({:?})", content),
            Self::KeyEvent { code } => write!(f, "key({})", code),
            Self::Launch { app } => write!(f, "launch({:?})", app),
            Self::Wait { duration } => write!(f, "wait({:.1}s)", duration.as_secs_f64()),
            Self::TakeOver { message } => write!(f, "take_over({:?})", message),
            Self::Note { content } => write!(f, "note({:?})", content),
            Self::TaskComplete { result } => match result {
                Some(r) => write!(f, "finish({:?})", r),
                None => write!(f, "finish()"),
            },
            Self::TaskFailed { reason } => write!(f, "fail({:?})", reason),
        }
    }
}
