use std::time::Duration;

use anyhow::{Context, Result};
use browser_oracle::config::{self, AgentArgs};
use browser_oracle::oracle::TaskRunner;
use browser_oracle::{Agent, BrowserTaskRunner, brain, face};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

/// Answer a numeric question by letting the model drive a browser.
#[derive(Parser)]
#[command(name = "browser-oracle", version)]
struct Cli {
    /// The question to answer, e.g. "What is the population of Lisbon?"
    task: String,

    #[command(flatten)]
    agent: AgentArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    config::init_tracing();

    let backend = brain::from_config(&cli.agent.llm_config())?;
    info!(provider = backend.name(), "brain ready");

    let events = face::channel();
    let echo = face::echo_to_terminal(&events);
    if let Some(port) = cli.agent.progress_port {
        face::start_server(port, events.clone())
            .await
            .context("starting progress page")?;
    }

    let agent = Agent::new(backend, events, cli.agent.agent_options());
    let runner = BrowserTaskRunner::new(agent, cli.agent.browser_options());
    let answer = runner.run(&cli.task).await;

    // The progress server keeps a sender alive, so bound the drain.
    drop(runner);
    let _ = tokio::time::timeout(Duration::from_millis(250), echo).await;

    println!("{}", answer?);
    Ok(())
}
