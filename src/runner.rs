use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::agent::Agent;
use crate::hands::{BrowserOptions, ChromeSession};
use crate::oracle::TaskRunner;

/// Runs each task in a freshly launched browser, closed when the run ends.
pub struct BrowserTaskRunner {
    agent: Agent,
    browser: BrowserOptions,
}

impl BrowserTaskRunner {
    pub fn new(agent: Agent, browser: BrowserOptions) -> Self {
        Self { agent, browser }
    }
}

#[async_trait]
impl TaskRunner for BrowserTaskRunner {
    async fn run(&self, task: &str) -> Result<i64> {
        let mut session = ChromeSession::launch(self.browser.clone())
            .await
            .context("launching Chrome")?;
        let answer = self.agent.run(&mut session, task).await?;
        info!(answer, "task answered");
        Ok(answer)
    }
}
