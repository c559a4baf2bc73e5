//! Static configuration: app registry, prompts and console strings.

mod apps;
mod i18n;
mod prompts;

pub use apps::{AppRegistry, StaticAppRegistry, DEFAULT_APPS};
pub use i18n::{Language, Messages, MESSAGES_EN, MESSAGES_ZH};
pub use prompts::{malformed_action_reminder, no_action_reminder, system_prompt};
