//! Polling node that answers an on-chain oracle's question with the agent.
//!
//! Each tick reads the oracle's timing and funding state. Once the cooloff has
//! elapsed and enough bounty is held, the oracle's script is run as an agent
//! task and the answer is written back on-chain.

pub mod chain;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// Shortest pause between two polls.
pub const MIN_RECHECK: Duration = Duration::from_secs(5);

/// Values read from the oracle contract on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleObservation {
    pub last_updated_at: u64,
    pub cooloff: u64,
    pub current_bounties_held: u128,
    pub bounty_amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Wait(Duration),
}

/// Whether the oracle may be updated at `now` (unix seconds), or how long to wait.
pub fn decide(obs: &OracleObservation, now: u64) -> Decision {
    let ready_at = obs.last_updated_at.saturating_add(obs.cooloff);
    if now >= ready_at && obs.current_bounties_held >= obs.bounty_amount {
        return Decision::Run;
    }
    let secs = ready_at.saturating_add(1).saturating_sub(now);
    Decision::Wait(Duration::from_secs(secs).max(MIN_RECHECK))
}

/// Read/write access to one oracle contract.
#[async_trait]
pub trait OracleContract: Send + Sync {
    async fn script(&self) -> Result<String>;

    async fn observe(&self) -> Result<OracleObservation>;

    /// Submit `value` and wait for one confirmation. Returns the transaction hash.
    async fn update_value(&self, value: i64) -> Result<String>;
}

/// Answers a task; the agent loop in production.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &str) -> Result<i64>;
}

pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Updated { value: i64, tx: String },
    Waiting(Duration),
    /// The agent run aborted; nothing was published this tick.
    RunFailed,
}

impl TickOutcome {
    pub fn next_poll(&self) -> Duration {
        match self {
            TickOutcome::Updated { .. } => Duration::ZERO,
            TickOutcome::Waiting(wait) => *wait,
            TickOutcome::RunFailed => MIN_RECHECK,
        }
    }
}

pub struct OracleNode<C, R, K> {
    contract: C,
    runner: R,
    clock: K,
    script: String,
}

impl<C, R, K> OracleNode<C, R, K>
where
    C: OracleContract,
    R: TaskRunner,
    K: Clock,
{
    /// Read the oracle's script once and get ready to poll.
    pub async fn start(contract: C, runner: R, clock: K) -> Result<Self> {
        let script = contract.script().await?;
        info!("Oracle Script: {}", script);
        Ok(Self {
            contract,
            runner,
            clock,
            script,
        })
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// One poll: observe, and run plus publish if the window is open.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let obs = self.contract.observe().await?;
        let now = self.clock.now();
        info!(
            last_updated_at = obs.last_updated_at,
            cooloff = obs.cooloff,
            now,
            current_bounties_held = %obs.current_bounties_held,
            bounty_amount = %obs.bounty_amount,
            "oracle state"
        );

        if let Decision::Wait(wait) = decide(&obs, now) {
            info!(
                "Waiting for the cooloff period to end or sufficient bounties to be held ({}s)",
                wait.as_secs()
            );
            return Ok(TickOutcome::Waiting(wait));
        }

        let value = match self.runner.run(&self.script).await {
            Ok(value) => value,
            Err(e) => {
                warn!("agent run failed, retrying on the next poll: {e:#}");
                return Ok(TickOutcome::RunFailed);
            }
        };
        info!(value, "Result");

        let tx = self.contract.update_value(value).await?;
        info!(%tx, "Transaction confirmed with 1 confirmation");
        Ok(TickOutcome::Updated { value, tx })
    }

    /// Poll forever. Chain errors are logged and retried after [`MIN_RECHECK`].
    pub async fn run(self) {
        loop {
            let wait = match self.tick().await {
                Ok(outcome) => outcome.next_poll(),
                Err(e) => {
                    warn!("poll failed: {e:#}");
                    MIN_RECHECK
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}
