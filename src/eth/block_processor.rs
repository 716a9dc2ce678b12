//! Per-block (and per-range) event extraction: fetch the logs for the
//! monitored contracts, route each one to a decoder and hand the resulting
//! envelope to the message queue.

use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use slog::o;
use web3::types::{BlockNumber, Filter, FilterBuilder, Log, H256, U256, U64};

use crate::{
    logging::COMPONENT_KEY,
    mq::{IMQClient, Subject},
};

use super::{event::EventEnvelope, router::EventRouter, rpc::EthRpcApi};

pub struct BlockProcessor<EthRpc, MQ> {
    eth_rpc: Arc<EthRpc>,
    mq_client: Arc<MQ>,
    router: Arc<EventRouter>,
    subject_prefix: String,
    logger: slog::Logger,
}

impl<EthRpc, MQ> Clone for BlockProcessor<EthRpc, MQ> {
    fn clone(&self) -> Self {
        Self {
            eth_rpc: self.eth_rpc.clone(),
            mq_client: self.mq_client.clone(),
            router: self.router.clone(),
            subject_prefix: self.subject_prefix.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<EthRpc, MQ> BlockProcessor<EthRpc, MQ>
where
    EthRpc: EthRpcApi,
    MQ: IMQClient,
{
    pub fn new(
        eth_rpc: Arc<EthRpc>,
        mq_client: Arc<MQ>,
        router: Arc<EventRouter>,
        subject_prefix: String,
        logger: &slog::Logger,
    ) -> Self {
        Self {
            eth_rpc,
            mq_client,
            router,
            subject_prefix,
            logger: logger.new(o!(COMPONENT_KEY => "BlockProcessor")),
        }
    }

    /// Processes a single block, returning its header hash so the caller can
    /// checkpoint it. Any decoder failure fails the whole block: a retry
    /// replays it and the queue's deduplication absorbs the duplicates.
    pub async fn process_block(&self, block_number: u64) -> Result<H256> {
        let header = self
            .eth_rpc
            .block(U64::from(block_number))
            .await
            .with_context(|| format!("Failed to fetch header for block {}", block_number))?;
        let block_hash = header
            .hash
            .ok_or_else(|| anyhow!("Header for block {} has no hash", block_number))?;
        let timestamp = checked_timestamp(header.timestamp)?;

        let logs = self
            .eth_rpc
            .get_logs(self.range_filter(block_number, block_number))
            .await
            .with_context(|| format!("Failed to fetch logs for block {}", block_number))?;

        for log in sorted_by_position(logs).iter() {
            self.route_and_publish(log, timestamp).await?;
        }

        Ok(block_hash)
    }

    /// Processes an inclusive block range with a single log query. Headers
    /// are only fetched for blocks that actually contain logs, since the
    /// envelope needs the block timestamp.
    pub async fn process_range(&self, from_block: u64, to_block: u64) -> Result<()> {
        let logs = self
            .eth_rpc
            .get_logs(self.range_filter(from_block, to_block))
            .await
            .with_context(|| {
                format!("Failed to fetch logs for blocks [{}, {}]", from_block, to_block)
            })?;

        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        for log in sorted_by_position(logs).iter() {
            let block_number = log
                .block_number
                .ok_or_else(|| anyhow!("Could not get block number from ETH log"))?
                .as_u64();
            let timestamp = match timestamps.get(&block_number) {
                Some(timestamp) => *timestamp,
                None => {
                    let header = self
                        .eth_rpc
                        .block(U64::from(block_number))
                        .await
                        .with_context(|| {
                            format!("Failed to fetch header for block {}", block_number)
                        })?;
                    let timestamp = checked_timestamp(header.timestamp)?;
                    timestamps.insert(block_number, timestamp);
                    timestamp
                }
            };
            self.route_and_publish(log, timestamp).await?;
        }

        Ok(())
    }

    fn range_filter(&self, from_block: u64, to_block: u64) -> Filter {
        FilterBuilder::default()
            // from_block *and* to_block are *inclusive*
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)))
            .address(self.router.contract_addresses())
            .build()
    }

    async fn route_and_publish(&self, log: &Log, timestamp: u64) -> Result<()> {
        let Some(payload) = self.router.route(log)? else {
            slog::trace!(
                self.logger,
                "Skipping log {:?} in block {:?}: signature not registered",
                log.log_index,
                log.block_number
            );
            return Ok(());
        };

        let envelope = EventEnvelope::from_log(log, timestamp, payload)?;
        let subject = Subject::new(
            &self.subject_prefix,
            &envelope.event_name,
            envelope.contract_address,
        );

        slog::debug!(
            self.logger,
            "Publishing {} from block {} (tx {:#x}, log {})",
            envelope.event_name,
            envelope.block_number,
            envelope.tx_hash,
            envelope.log_index
        );

        self.mq_client
            .publish(&subject, &envelope.dedup_key(), &envelope)
            .await
            .with_context(|| format!("Failed to publish envelope to {}", subject))
    }
}

/// Logs are delivered in ascending order for mined ranges, but the envelope
/// ordering contract is ours, so sort explicitly.
fn sorted_by_position(mut logs: Vec<Log>) -> Vec<Log> {
    logs.sort_by_key(|log| (log.block_number, log.log_index));
    logs
}

fn checked_timestamp(timestamp: U256) -> Result<u64> {
    if timestamp > U256::from(u64::MAX) {
        bail!("Block timestamp out of range: {}", timestamp);
    }
    Ok(timestamp.as_u64())
}
