//! Console strings in the supported languages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Language of prompts and console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "cn")]
    Chinese,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// Parse a language code. Anything but `en` means Chinese.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Self::English,
            _ => Self::Chinese,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Chinese => "cn",
            Self::English => "en",
        }
    }

    pub fn messages(&self) -> &'static Messages {
        match self {
            Self::Chinese => &MESSAGES_ZH,
            Self::English => &MESSAGES_EN,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Console strings.
#[derive(Debug, Clone)]
pub struct Messages {
    pub thinking: &'static str,
    pub action: &'static str,
    pub step: &'static str,
    pub task: &'static str,
    pub starting_task: &'static str,
    pub task_completed: &'static str,
    pub task_failed: &'static str,
    pub reason: &'static str,
    pub confirmation_required: &'static str,
    pub continue_prompt: &'static str,
    pub manual_operation_required: &'static str,
    pub press_enter_when_done: &'static str,
    pub enter_task: &'static str,
    pub goodbye: &'static str,
    pub cancelled: &'static str,
}

pub static MESSAGES_ZH: Messages = Messages {
    thinking: "思考过程",
    action: "执行动作",
    step: "步骤",
    task: "任务",
    starting_task: "开始执行任务",
    task_completed: "任务完成",
    task_failed: "任务失败",
    reason: "原因",
    confirmation_required: "需要确认",
    continue_prompt: "是否继续？(y/n)",
    manual_operation_required: "需要人工操作",
    press_enter_when_done: "完成后按回车继续",
    enter_task: "请输入任务（输入 quit 退出）",
    goodbye: "再见",
    cancelled: "已取消",
};

pub static MESSAGES_EN: Messages = Messages {
    thinking: "Thinking",
    action: "Action",
    step: "Step",
    task: "Task",
    starting_task: "Starting task",
    task_completed: "Task completed",
    task_failed: "Task failed",
    reason: "Reason",
    confirmation_required: "Confirmation required",
    continue_prompt: "Continue? (y/n)",
    manual_operation_required: "Manual operation required",
    press_enter_when_done: "Press Enter when done",
    enter_task: "Enter a task (type quit to exit)",
    goodbye: "Goodbye",
    cancelled: "Cancelled",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::from_code("en"), Language::English);
        assert_eq!(Language::from_code("EN"), Language::English);
        assert_eq!(Language::from_code("cn"), Language::Chinese);
        assert_eq!(Language::from_code("fr"), Language::Chinese);
        assert_eq!(Language::English.to_string(), "en");
    }

    #[test]
    fn test_messages() {
        assert_eq!(Language::Chinese.messages().thinking, "思考过程");
        assert_eq!(Language::English.messages().thinking, "Thinking");
    }

    #[test]
    fn test_language_serde() {
        let json = serde_json::to_string(&Language::English).unwrap();
        assert_eq!(json, "\"en\"");
        let lang: Language = serde_json::from_str("\"cn\"").unwrap();
        assert_eq!(lang, Language::Chinese);
    }
}
