use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Placeholder shown for both URL and content before the first navigation.
pub const NO_PAGE_LOADED: &str = "<no page loaded>";

/// A single atomic action the model asks the agent to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Goto { url: String },
    Click { pointer: u32 },
    Type {
        pointer: u32,
        text: String,
        press_enter: bool,
    },
    Answer { value: i64 },
}

impl Action {
    /// How long to let the page settle after this action before observing it.
    pub fn settle_time(&self, settle: &SettleTimes) -> Duration {
        match self {
            Action::Goto { .. } => settle.goto,
            Action::Click { .. } => settle.click,
            Action::Type {
                press_enter: false, ..
            } => settle.type_text,
            Action::Type {
                press_enter: true, ..
            } => settle.type_and_enter,
            Action::Answer { .. } => Duration::ZERO,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Goto { url } => write!(f, "goto {url}"),
            Action::Click { pointer } => write!(f, "click #{pointer}"),
            Action::Type {
                pointer,
                text,
                press_enter,
            } => {
                write!(f, "type {text:?} into #{pointer}")?;
                if *press_enter {
                    write!(f, " and press Enter")?;
                }
                Ok(())
            }
            Action::Answer { value } => write!(f, "answer {value}"),
        }
    }
}

/// Pauses applied around browser actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTimes {
    pub goto: Duration,
    pub click: Duration,
    pub type_text: Duration,
    pub type_and_enter: Duration,
    /// Pause between the focusing clicks that precede typing.
    pub focus_pause: Duration,
    /// Pause between typing and pressing Enter.
    pub before_enter: Duration,
}

impl Default for SettleTimes {
    fn default() -> Self {
        Self {
            goto: Duration::from_secs(2),
            click: Duration::from_secs(5),
            type_text: Duration::from_secs(2),
            type_and_enter: Duration::from_secs(5),
            focus_pause: Duration::from_millis(100),
            before_enter: Duration::from_millis(100),
        }
    }
}

impl SettleTimes {
    pub fn none() -> Self {
        Self {
            goto: Duration::ZERO,
            click: Duration::ZERO,
            type_text: Duration::ZERO,
            type_and_enter: Duration::ZERO,
            focus_pause: Duration::ZERO,
            before_enter: Duration::ZERO,
        }
    }
}

pub const FOCUS_CLICKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation history sent to the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the agent observes after executing an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub content: String,
}

impl PageSnapshot {
    pub fn not_loaded() -> Self {
        Self {
            url: NO_PAGE_LOADED.to_string(),
            content: NO_PAGE_LOADED.to_string(),
        }
    }

    pub fn to_message(&self) -> String {
        format!(
            "Current URL: {}\n\nCurrent page content:\n{}",
            self.url, self.content
        )
    }
}
