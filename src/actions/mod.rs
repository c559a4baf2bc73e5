//! Model output parsing and action dispatch.

mod directive;
mod handler;
mod parser;

pub use directive::ActionDirective;
pub use handler::{
    swipe_duration, ActionError, ActionHandler, ActionOutcome, ConfirmationCallback,
    TakeoverCallback, DEFAULT_LONG_PRESS_MS, MAX_SWIPE_MS, MIN_SWIPE_MS,
};
pub use parser::{ActionParser, ParseError, ParsedResponse};
