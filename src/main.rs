use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ctf_indexer::{
    db::PersistentStateDB,
    eth::{block_processor::BlockProcessor, router::EventRouter, rpc::EthHttpRpcClient},
    health::HealthChecker,
    logging, metrics,
    mq::nats_client::NatsMQClient,
    settings::{CommandLineOptions, Settings},
    sync::{SyncState, Synchronizer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = CommandLineOptions::parse();
    let settings = Settings::new(&opts).context("Failed to load settings")?;

    let root_logger = logging::new_json_logger();
    slog::info!(root_logger, "Starting ctf-indexer"; "config" => &opts.config_path);

    metrics::register_metrics();

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone(), &root_logger);

    let eth_rpc = Arc::new(
        EthHttpRpcClient::new_validated(&settings.eth, &root_logger)
            .await
            .context("Failed to create ETH RPC client")?,
    );

    let mq_client = Arc::new(
        *NatsMQClient::connect(&settings.message_queue, &root_logger)
            .await
            .context("Failed to connect to the message queue")?,
    );

    let db = Arc::new(
        PersistentStateDB::open(&settings.db.data_path)
            .context("Failed to open the checkpoint database")?,
    );

    let router = Arc::new(
        EventRouter::new(
            settings.eth.exchange_address(),
            settings.eth.conditional_tokens_address(),
        )
        .context("Failed to build the event router")?,
    );

    let state = Arc::new(SyncState::new());

    if let Some(health_check_settings) = &settings.health_check {
        let health_checker = HealthChecker::new(
            health_check_settings,
            state.clone(),
            mq_client.clone(),
            &root_logger,
        )
        .await?;
        tokio::spawn(health_checker.run());
    }

    if let Some(prometheus_settings) = settings.prometheus.clone() {
        let logger = root_logger.clone();
        tokio::spawn(async move { metrics::start(&prometheus_settings, &logger).await });
    }

    let processor = BlockProcessor::new(
        eth_rpc.clone(),
        mq_client,
        router,
        settings.message_queue.subject_prefix.clone(),
        &root_logger,
    );

    let synchronizer = Synchronizer::new(
        eth_rpc,
        processor,
        db,
        state,
        settings.sync.clone(),
        settings.eth.start_block,
        shutdown,
        &root_logger,
    );

    synchronizer.run().await
}

fn spawn_signal_handler(shutdown: CancellationToken, logger: &slog::Logger) {
    let logger = logger.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => slog::info!(logger, "Received SIGTERM, shutting down"),
            _ = sigint.recv() => slog::info!(logger, "Received SIGINT, shutting down"),
        }
        shutdown.cancel();
    });
}
