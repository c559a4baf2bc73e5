//! Per-task context owned by the control loop.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::state::{LoopState, TaskOutcome};
use crate::geometry::DeviceProfile;
use crate::model::MessageBuilder;

/// Whether the caller runs one task or keeps prompting for more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    SingleTask,
    Interactive,
}

/// Everything one task run accumulates.
///
/// Sessions are never shared: each device gets its own, and only the control
/// loop writes to the cycle counter and history.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub task: String,
    pub mode: ExecutionMode,
    pub profile: DeviceProfile,
    /// Cycles started so far.
    pub cycle: u32,
    pub started_at: DateTime<Utc>,
    history: Vec<Value>,
    state: LoopState,
    outcome: Option<TaskOutcome>,
    aspect_warned: bool,
}

impl Session {
    pub fn new(task: impl Into<String>, mode: ExecutionMode, profile: DeviceProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            mode,
            profile,
            cycle: 0,
            started_at: Utc::now(),
            history: Vec::new(),
            state: LoopState::Idle,
            outcome: None,
            aspect_warned: false,
        }
    }

    /// Conversation so far, in OpenAI message format.
    pub fn history(&self) -> &[Value] {
        &self.history
    }

    pub fn is_first_cycle(&self) -> bool {
        self.cycle <= 1
    }

    /// The state the control loop last entered.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Whether the task has completed or failed.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// How the task ended, once it has.
    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    pub(crate) fn enter(&mut self, state: LoopState) {
        self.state = state;
    }

    pub(crate) fn finish(&mut self, outcome: TaskOutcome) {
        self.state = if outcome.is_success() {
            LoopState::Completed
        } else {
            LoopState::Failed
        };
        self.outcome = Some(outcome);
    }

    pub(crate) fn push(&mut self, message: Value) {
        self.history.push(message);
    }

    /// Remove every image from the history, keeping the text.
    pub(crate) fn strip_images(&mut self) {
        for message in &mut self.history {
            MessageBuilder::remove_images_from_message(message);
        }
    }

    /// Returns true the first time it is called.
    pub(crate) fn mark_aspect_warned(&mut self) -> bool {
        !std::mem::replace(&mut self.aspect_warned, true)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
