//! The synchronizer: drives block advancement from the last durable
//! checkpoint towards the safe head, in bulk (worker pool over contiguous
//! batches) when far behind and block-by-block when tailing the chain.
//!
//! The checkpoint only advances after every envelope of the covered blocks
//! has been handed to the message queue, so a crash or error replays the
//! uncheckpointed range and the queue's deduplication absorbs the repeats.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use futures::future::join_all;
use slog::o;
use tokio_util::sync::CancellationToken;
use web3::types::U64;

use crate::{
    db::PersistentStateDB,
    eth::{block_processor::BlockProcessor, rpc::EthRpcApi, EventDecodeError},
    logging::COMPONENT_KEY,
    metrics,
    mq::IMQClient,
    settings,
};

/// Sync progress shared with the status endpoints. Written by the
/// synchronizer only; read without blocking by the health and metrics
/// probes.
#[derive(Default)]
pub struct SyncState {
    current_block: AtomicU64,
    latest_block: AtomicU64,
    healthy: AtomicBool,
}

impl SyncState {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::SeqCst)
    }

    pub fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn set_current_block(&self, block_number: u64) {
        self.current_block.store(block_number, Ordering::SeqCst);
        metrics::CURRENT_BLOCK.set(block_number as i64);
    }

    fn set_latest_block(&self, block_number: u64) {
        self.latest_block.store(block_number, Ordering::SeqCst);
        metrics::LATEST_BLOCK.set(block_number as i64);
    }
}

/// An error from one sync step, tagged with the machine-readable
/// `error_type` used for the error counter label and the log line.
#[derive(Debug)]
struct StepError {
    error_type: &'static str,
    source: anyhow::Error,
}

impl StepError {
    fn new(error_type: &'static str, source: anyhow::Error) -> Self {
        Self { error_type, source }
    }

    /// A registered event failed to decode. Retrying cannot fix the log
    /// itself, but the checkpoint must not move past it either.
    fn is_decode_error(&self) -> bool {
        self.source.downcast_ref::<EventDecodeError>().is_some()
    }
}

pub struct Synchronizer<EthRpc, MQ> {
    eth_rpc: Arc<EthRpc>,
    processor: BlockProcessor<EthRpc, MQ>,
    db: Arc<PersistentStateDB>,
    state: Arc<SyncState>,
    sync_settings: settings::Sync,
    start_block: u64,
    shutdown: CancellationToken,
    logger: slog::Logger,
}

impl<EthRpc, MQ> Synchronizer<EthRpc, MQ>
where
    EthRpc: EthRpcApi + 'static,
    MQ: IMQClient + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        eth_rpc: Arc<EthRpc>,
        processor: BlockProcessor<EthRpc, MQ>,
        db: Arc<PersistentStateDB>,
        state: Arc<SyncState>,
        sync_settings: settings::Sync,
        start_block: u64,
        shutdown: CancellationToken,
        logger: &slog::Logger,
    ) -> Self {
        Self {
            eth_rpc,
            processor,
            db,
            state,
            sync_settings,
            start_block,
            shutdown,
            logger: logger.new(o!(COMPONENT_KEY => "Synchronizer")),
        }
    }

    /// Runs until cancelled. Errors never advance the checkpoint; they are
    /// counted, logged and retried after a bounded pause.
    pub async fn run(&self) -> Result<()> {
        let checkpoint = self
            .db
            .get_or_create_checkpoint(&self.sync_settings.service_name, self.start_block)?;
        self.state.set_current_block(checkpoint.last_block);
        slog::info!(
            self.logger,
            "Starting sync for '{}' from block {}",
            self.sync_settings.service_name,
            checkpoint.last_block + 1
        );

        loop {
            if self.shutdown.is_cancelled() {
                slog::info!(self.logger, "Shutdown requested, stopping sync");
                return Ok(());
            }

            if let Err(error) = self.step().await {
                if self.shutdown.is_cancelled() {
                    // cancellation is a clean return, not an error
                    continue;
                }
                self.state.set_healthy(false);
                metrics::ERRORS_TOTAL
                    .with_label_values(&[error.error_type])
                    .inc();
                if error.is_decode_error() {
                    slog::error!(
                        self.logger,
                        "A registered event failed to decode; the checkpoint will not advance past it. Operator attention required";
                        "error_type" => error.error_type,
                        "error" => format!("{:#}", error.source)
                    );
                } else {
                    slog::error!(
                        self.logger,
                        "Sync step failed";
                        "error_type" => error.error_type,
                        "error" => format!("{:#}", error.source)
                    );
                }
                self.sleep_cancellable(self.sync_settings.retry_interval())
                    .await;
            }
        }
    }

    async fn step(&self) -> Result<(), StepError> {
        let safe_head = self.observe_safe_head().await?;
        let current = self.state.current_block();

        if safe_head > current && safe_head - current > 2 * self.sync_settings.batch_size {
            self.bulk_sync(safe_head).await
        } else {
            self.tail_tick(safe_head).await
        }
    }

    /// Probes the chain head and derives the highest block considered final.
    async fn observe_safe_head(&self) -> Result<u64, StepError> {
        let latest = self
            .eth_rpc
            .block_number()
            .await
            .map_err(|e| StepError::new("get_latest_block", e))?
            .as_u64();
        self.state.set_latest_block(latest);

        let safe_head = latest.saturating_sub(self.sync_settings.confirmations);
        metrics::BLOCKS_BEHIND.set(safe_head.saturating_sub(self.state.current_block()) as i64);
        Ok(safe_head)
    }

    /// Catch-up mode: processes contiguous batches with the worker pool
    /// until the safe head is reached, checkpointing after each batch.
    async fn bulk_sync(&self, initial_safe_head: u64) -> Result<(), StepError> {
        slog::info!(
            self.logger,
            "Entering bulk sync, {} blocks behind the safe head",
            initial_safe_head - self.state.current_block()
        );

        let mut safe_head = initial_safe_head;
        loop {
            let current = self.state.current_block();
            if current >= safe_head {
                break;
            }
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let batch_end = std::cmp::min(current + self.sync_settings.batch_size, safe_head);
            self.process_batch(current + 1, batch_end).await?;
            if self.shutdown.is_cancelled() {
                // the batch may have been abandoned mid-flight; it is not
                // checkpointed and will be replayed on the next start
                return Ok(());
            }
            self.checkpoint(batch_end).await?;
            safe_head = self.observe_safe_head().await?;
        }

        slog::info!(
            self.logger,
            "Bulk sync caught up at block {}",
            self.state.current_block()
        );
        Ok(())
    }

    /// Splits the batch into disjoint sub-ranges of equal length, one per
    /// worker (the last worker absorbs the remainder), and joins them all.
    /// The batch fails if any worker fails.
    async fn process_batch(&self, from_block: u64, to_block: u64) -> Result<(), StepError> {
        let handles: Vec<_> = partition_range(from_block, to_block, self.sync_settings.workers)
            .into_iter()
            .map(|(sub_from, sub_to)| {
                let processor = self.processor.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            Err(anyhow!("Cancelled while processing blocks [{}, {}]", sub_from, sub_to))
                        }
                        result = processor.process_range(sub_from, sub_to) => result,
                    }
                })
            })
            .collect();

        for result in join_all(handles).await {
            result
                .map_err(|e| StepError::new("process_batch", anyhow!("Worker task failed: {}", e)))?
                .map_err(|e| StepError::new("process_batch", e))?;
        }
        Ok(())
    }

    /// Realtime mode: one poll tick. Processes the blocks between the
    /// checkpoint and the safe head sequentially, checkpointing each one,
    /// then sleeps for the poll interval.
    async fn tail_tick(&self, safe_head: u64) -> Result<(), StepError> {
        let current = self.state.current_block();
        for block_number in (current + 1)..=safe_head {
            let block_hash = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                result = self.processor.process_block(block_number) => {
                    result.map_err(|e| StepError::new("process_batch", e))?
                }
            };
            self.db
                .update_checkpoint_block(
                    &self.sync_settings.service_name,
                    block_number,
                    block_hash.to_fixed_bytes(),
                )
                .map_err(|e| StepError::new("update_checkpoint", e))?;
            self.state.set_current_block(block_number);
            metrics::BLOCKS_BEHIND.set(safe_head.saturating_sub(block_number) as i64);
        }

        self.state.set_healthy(true);
        self.sleep_cancellable(self.sync_settings.poll_interval())
            .await;
        Ok(())
    }

    /// Persists `block_number` (and its header hash) as the new checkpoint
    /// after a successful batch.
    async fn checkpoint(&self, block_number: u64) -> Result<(), StepError> {
        let header = self
            .eth_rpc
            .block(U64::from(block_number))
            .await
            .map_err(|e| StepError::new("update_checkpoint", e))?;
        let block_hash = header.hash.ok_or_else(|| {
            StepError::new(
                "update_checkpoint",
                anyhow!("Header for block {} has no hash", block_number),
            )
        })?;

        self.db
            .update_checkpoint_block(
                &self.sync_settings.service_name,
                block_number,
                block_hash.to_fixed_bytes(),
            )
            .map_err(|e| StepError::new("update_checkpoint", e))?;
        self.state.set_current_block(block_number);
        Ok(())
    }

    async fn sleep_cancellable(&self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Disjoint, ordered sub-ranges (inclusive bounds) covering
/// `[from_block, to_block]`, at most one per worker.
fn partition_range(from_block: u64, to_block: u64, workers: usize) -> Vec<(u64, u64)> {
    let total = to_block - from_block + 1;
    let workers = std::cmp::max(1, std::cmp::min(workers as u64, total));
    let chunk = total / workers;
    (0..workers)
        .map(|i| {
            let sub_from = from_block + i * chunk;
            let sub_to = if i == workers - 1 {
                to_block
            } else {
                sub_from + chunk - 1
            };
            (sub_from, sub_to)
        })
        .collect()
}
