use alloy::primitives::Address;
use anyhow::{Context, Result, bail};
use browser_oracle::config::{self, AgentArgs, ChainArgs};
use browser_oracle::error::ConfigError;
use browser_oracle::oracle::chain::ChainOracle;
use browser_oracle::oracle::{OracleNode, SystemClock};
use browser_oracle::{Agent, BrowserTaskRunner, brain, face};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

/// Keep an on-chain oracle answered: poll it, and when its cooloff has passed
/// and the bounty is funded, answer its question with the browser agent.
#[derive(Parser)]
#[command(name = "oracle-node", version)]
struct Cli {
    /// Address of the oracle contract.
    address: Option<String>,

    #[command(flatten)]
    chain: ChainArgs,

    #[command(flatten)]
    agent: AgentArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    config::init_tracing();

    let Some(address) = cli.address.as_deref() else {
        bail!("No oracle address specified");
    };
    let address: Address = address
        .parse()
        .map_err(|e| ConfigError::InvalidValue("oracle address", format!("{address}: {e}")))?;
    let private_key = cli.chain.private_key()?;
    let backend = brain::from_config(&cli.agent.llm_config())?;

    info!(
        chain_id = cli.chain.chain_id,
        rpc_url = %cli.chain.rpc_url,
        provider = backend.name(),
        "starting oracle node"
    );
    let contract = ChainOracle::connect(&cli.chain.rpc_url, private_key, address)?;

    let events = face::channel();
    let _echo = face::echo_to_terminal(&events);
    if let Some(port) = cli.agent.progress_port {
        face::start_server(port, events.clone())
            .await
            .context("starting progress page")?;
    }

    let agent = Agent::new(backend, events, cli.agent.agent_options());
    let runner = BrowserTaskRunner::new(agent, cli.agent.browser_options());
    let node = OracleNode::start(contract, runner, SystemClock)
        .await
        .context("reading oracle script")?;

    tokio::select! {
        _ = node.run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
