//! Control loop states and terminal outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actions::ActionDirective;

/// Where the control loop is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    AwaitingModel,
    Parsing,
    Acting,
    Completed,
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Completed | LoopState::Failed)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Capturing => "capturing",
            LoopState::AwaitingModel => "awaiting-model",
            LoopState::Parsing => "parsing",
            LoopState::Acting => "acting",
            LoopState::Completed => "completed",
            LoopState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a task ended unsuccessfully.
///
/// The kebab-case names are stable and safe to match on in scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    DeviceDisconnected,
    DeviceRejected,
    TransportExhausted,
    NoActionExhausted,
    MalformedActionExhausted,
    CompressionExhausted,
    MaxTurnsExceeded,
    ModelReported,
    UserDeclined,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DeviceDisconnected => "device-disconnected",
            FailureKind::DeviceRejected => "device-rejected",
            FailureKind::TransportExhausted => "transport-exhausted",
            FailureKind::NoActionExhausted => "no-action-exhausted",
            FailureKind::MalformedActionExhausted => "malformed-action-exhausted",
            FailureKind::CompressionExhausted => "compression-exhausted",
            FailureKind::MaxTurnsExceeded => "max-turns-exceeded",
            FailureKind::ModelReported => "model-reported",
            FailureKind::UserDeclined => "user-declined",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal failure with the error that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled by user")
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { result: Option<String> },
    Failed { failure: Failure },
}

impl TaskOutcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            failure: Failure::new(kind, detail),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            TaskOutcome::Failed { failure } => Some(failure),
            TaskOutcome::Completed { .. } => None,
        }
    }
}

impl From<Failure> for TaskOutcome {
    fn from(failure: Failure) -> Self {
        TaskOutcome::Failed { failure }
    }
}

/// What a single cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Cycle number within the session.
    pub cycle: u32,
    pub thinking: Option<String>,
    /// The directive the model chose, if it gave a usable one.
    pub directive: Option<ActionDirective>,
    /// Set once the task has ended.
    pub finished: Option<TaskOutcome>,
}

impl StepOutcome {
    pub(crate) fn new(cycle: u32) -> Self {
        Self {
            cycle,
            thinking: None,
            directive: None,
            finished: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}
