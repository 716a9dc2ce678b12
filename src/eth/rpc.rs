use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use slog::o;
use web3::{
    transports::Http,
    types::{Block, BlockId, BlockNumber, Filter, Log, H256, U256, U64},
    Web3,
};

use crate::{logging::COMPONENT_KEY, settings};

use super::utils::redact_secret_endpoint;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EthRpcApi: Send + Sync {
    /// Get the latest block number.
    async fn block_number(&self) -> Result<U64>;

    /// Gets block, returning error when either:
    /// - Request fails
    /// - Request succeeds, but doesn't return a block
    async fn block(&self, block_number: U64) -> Result<Block<H256>>;

    async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>>;

    async fn chain_id(&self) -> Result<U256>;
}

#[derive(Clone)]
pub struct EthHttpRpcClient {
    web3: Web3<Http>,
}

impl EthHttpRpcClient {
    pub fn new(eth_settings: &settings::Eth, logger: &slog::Logger) -> Result<Self> {
        let logger = logger.new(o!(COMPONENT_KEY => "EthHttpRpcClient"));
        slog::info!(
            logger,
            "Connecting to ETH node at {}",
            redact_secret_endpoint(&eth_settings.http_endpoint)?
        );

        let transport = Http::new(&eth_settings.http_endpoint)
            .context("Failed to create HTTP transport for ETH node")?;

        Ok(Self {
            web3: Web3::new(transport),
        })
    }

    /// Build a client and check that the node is on the chain we expect.
    /// A mismatch means the endpoint configuration is wrong, so we abort
    /// before anything is published.
    pub async fn new_validated(
        eth_settings: &settings::Eth,
        logger: &slog::Logger,
    ) -> Result<Self> {
        let client = Self::new(eth_settings, logger)?;

        let chain_id = client
            .chain_id()
            .await
            .context("Failed to fetch chain id from ETH node")?;
        let expected_chain_id = U256::from(eth_settings.chain_id);
        if chain_id != expected_chain_id {
            bail!(
                "Connected ETH node is on chain id {}, but the configuration expects {}",
                chain_id,
                expected_chain_id
            );
        }

        Ok(client)
    }
}

#[async_trait]
impl EthRpcApi for EthHttpRpcClient {
    async fn block_number(&self) -> Result<U64> {
        self.web3
            .eth()
            .block_number()
            .await
            .context("Failed to fetch block number from ETH node")
    }

    async fn block(&self, block_number: U64) -> Result<Block<H256>> {
        self.web3
            .eth()
            .block(BlockId::Number(BlockNumber::Number(block_number)))
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("Getting ETH block for block number {} returned None", block_number)
            })
    }

    async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>> {
        self.web3
            .eth()
            .logs(filter)
            .await
            .context("Failed to fetch logs from ETH node")
    }

    async fn chain_id(&self) -> Result<U256> {
        self.web3
            .eth()
            .chain_id()
            .await
            .context("Failed to fetch chain id")
    }
}
