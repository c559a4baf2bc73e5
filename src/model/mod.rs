//! Model client module for AI inference.

mod client;
mod retry;

pub use client::{
    MessageBuilder, ModelClient, ModelConfig, ModelResponse, TransportError, VisionModel,
    DEFAULT_TIMEOUT_SECS,
};
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};
