use thiserror::Error;

/// Malformed action text from the model. Always reported back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid input: Missing or improperly placed start or end tag for <{tag}>.")]
    MalformedTag { tag: String },

    #[error("{action} action did not contain {field}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error("pointer must be a positive integer, got {0:?}")]
    InvalidPointer(String),

    #[error("answer must be an integer, got {0:?}")]
    InvalidAnswer(String),
}

/// Failure while driving the browser.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("element with pointer {0} not found")]
    PointerNotFound(u32),

    #[error("failed to navigate to {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("no pages")]
    NoOpenPages,

    #[error("browser session lost: {0}")]
    BrowserLost(String),
}

impl ActionError {
    /// Fatal errors abort the run instead of being shown to the model.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::NoOpenPages | ActionError::BrowserLost(_))
    }
}

/// Failure of a completion provider.
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// The provider emitted events out of the expected order.
    #[error("unexpected {provider} stream event: {detail}")]
    Protocol {
        provider: &'static str,
        detail: String,
    },

    #[error("malformed stream payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Outcome of a single turn that did not produce an observation.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Reasons an agent run ends without an answer.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("completion failed: {0}")]
    Brain(#[from] BrainError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("giving up after {0} turns without an answer")]
    TurnLimit(usize),
}
