//! A browser-driving agent that answers numeric questions, and a node that
//! feeds those answers to an on-chain oracle.

pub mod agent;
pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod face;
pub mod hands;
pub mod oracle;
pub mod prompts;
pub mod runner;
pub mod tags;
pub mod types;

pub use agent::{Agent, AgentOptions};
pub use error::{ActionError, AgentError, BrainError, ConfigError, ParseError};
pub use runner::BrowserTaskRunner;
pub use types::Action;
