//! Agent module for orchestrating phone automation.

mod control_loop;
mod phone_agent;
mod session;
mod state;

pub use control_loop::ControlLoop;
pub use phone_agent::{
    AgentConfig, AgentError, PhoneAgent, DEFAULT_MAX_CLARIFICATIONS, DEFAULT_MAX_TURNS,
};
pub use session::{ExecutionMode, Session};
pub use state::{Failure, FailureKind, LoopState, StepOutcome, TaskOutcome};
