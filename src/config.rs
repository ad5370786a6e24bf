//! Command-line and environment configuration shared by both binaries.

use std::path::PathBuf;

use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::agent::AgentOptions;
use crate::brain::{LlmConfig, Provider};
use crate::error::ConfigError;
use crate::hands::BrowserOptions;

pub const DEFAULT_RPC_URL: &str = "https://rpc2.sepolia.org";
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Settings for the model, the browser and the agent loop.
#[derive(Debug, Clone, Args)]
pub struct AgentArgs {
    /// Completion provider.
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value_t = Provider::Openai)]
    pub provider: Provider,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4-turbo-preview")]
    pub openai_model: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_MODEL", default_value = "claude-3-opus-20240229")]
    pub anthropic_model: String,

    /// Give up after this many model turns.
    #[arg(long, env = "MAX_TURNS")]
    pub max_turns: Option<usize>,

    /// Run Chrome without a window.
    #[arg(long, env = "BROWSER_HEADLESS")]
    pub headless: bool,

    /// Serve live progress on this port (or the next free one).
    #[arg(long, env = "PROGRESS_PORT")]
    pub progress_port: Option<u16>,

    /// Directory for page content audit files. Defaults to the OS temp dir.
    #[arg(long, env = "AUDIT_DIR")]
    pub audit_dir: Option<PathBuf>,
}

impl AgentArgs {
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.provider,
            openai_api_key: non_empty(&self.openai_api_key),
            openai_model: self.openai_model.clone(),
            anthropic_api_key: non_empty(&self.anthropic_api_key),
            anthropic_model: self.anthropic_model.clone(),
        }
    }

    pub fn browser_options(&self) -> BrowserOptions {
        let mut options = BrowserOptions {
            headless: self.headless,
            ..BrowserOptions::default()
        };
        if let Some(dir) = &self.audit_dir {
            options.audit_dir = dir.clone();
        }
        options
    }

    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            max_turns: self.max_turns.filter(|&n| n > 0),
        }
    }
}

/// Settings the oracle node needs on top of [`AgentArgs`].
#[derive(Debug, Clone, Args)]
pub struct ChainArgs {
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    #[arg(long, env = "CHAIN_ID", default_value_t = SEPOLIA_CHAIN_ID)]
    pub chain_id: u64,
}

impl ChainArgs {
    pub fn private_key(&self) -> Result<&str, ConfigError> {
        self.private_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingEnvVar("PRIVATE_KEY"))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Log to stderr, `browser_oracle=info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("browser_oracle=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
