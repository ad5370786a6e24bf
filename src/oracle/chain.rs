//! The oracle contract over JSON-RPC, signing with a local key.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, I256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{OracleContract, OracleObservation};

sol! {
    #[sol(rpc)]
    interface IOracle {
        function script() external view returns (string memory);
        function lastUpdatedAt() external view returns (uint256);
        function cooloff() external view returns (uint256);
        function currentBountiesHeld() external view returns (uint256);
        function bountyAmount() external view returns (uint256);
        function updateValue(int256 newValue) external;
    }
}

pub struct ChainOracle {
    contract: IOracle::IOracleInstance<DynProvider>,
}

impl ChainOracle {
    pub fn connect(rpc_url: &str, private_key: &str, address: Address) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("PRIVATE_KEY is not a valid secp256k1 private key")?;
        info!(signer = %signer.address(), oracle = %address, rpc_url, "connecting to oracle");

        let url = rpc_url
            .parse()
            .with_context(|| format!("invalid RPC URL {rpc_url}"))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            contract: IOracle::new(address, provider),
        })
    }
}

fn seconds(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

fn wei(value: U256, field: &str) -> Result<u128> {
    u128::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

#[async_trait]
impl OracleContract for ChainOracle {
    async fn script(&self) -> Result<String> {
        self.contract
            .script()
            .call()
            .await
            .context("reading oracle script")
    }

    async fn observe(&self) -> Result<OracleObservation> {
        let last_updated_at = self.contract.lastUpdatedAt().call().await?;
        let cooloff = self.contract.cooloff().call().await?;
        let held = self.contract.currentBountiesHeld().call().await?;
        let amount = self.contract.bountyAmount().call().await?;

        Ok(OracleObservation {
            last_updated_at: seconds(last_updated_at, "lastUpdatedAt")?,
            cooloff: seconds(cooloff, "cooloff")?,
            current_bounties_held: wei(held, "currentBountiesHeld")?,
            bounty_amount: wei(amount, "bountyAmount")?,
        })
    }

    async fn update_value(&self, value: i64) -> Result<String> {
        let value = I256::try_from(value).map_err(|e| anyhow!("answer {value} as int256: {e}"))?;
        let pending = self
            .contract
            .updateValue(value)
            .send()
            .await
            .context("sending updateValue")?;
        debug!(tx = %pending.tx_hash(), "updateValue submitted");

        let receipt = pending
            .with_required_confirmations(1)
            .get_receipt()
            .await
            .context("waiting for updateValue receipt")?;
        if !receipt.status() {
            return Err(anyhow!(
                "updateValue reverted in {}",
                receipt.transaction_hash
            ));
        }
        Ok(receipt.transaction_hash.to_string())
    }
}
