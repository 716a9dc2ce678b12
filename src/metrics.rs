//! Metric monitoring for the indexer, allowing a prometheus server to query
//! sync progress and error counts. Returns the metrics encoded in a
//! prometheus format.

use std::net::IpAddr;

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use slog::o;
use warp::Filter;

use crate::{logging::COMPONENT_KEY, settings};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    /// Highest block fully processed, published and checkpointed.
    pub static ref CURRENT_BLOCK: IntGauge =
        IntGauge::new("indexer_current_block", "Highest block fully processed and checkpointed")
            .expect("Metric successfully created");
    /// Most recently observed chain head.
    pub static ref LATEST_BLOCK: IntGauge =
        IntGauge::new("indexer_latest_block", "Most recently observed head block")
            .expect("Metric successfully created");
    /// Distance between the safe head and the current block.
    pub static ref BLOCKS_BEHIND: IntGauge =
        IntGauge::new("indexer_blocks_behind", "Blocks between the safe head and the current block")
            .expect("Metric successfully created");
    /// Errors by machine-readable type, e.g. `process_batch`.
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_errors_total", "Count of errors while syncing, by type"),
        &["error_type"]
    )
    .expect("Metric successfully created");
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(CURRENT_BLOCK.clone()))
        .expect("Metric successfully registered");
    REGISTRY
        .register(Box::new(LATEST_BLOCK.clone()))
        .expect("Metric successfully registered");
    REGISTRY
        .register(Box::new(BLOCKS_BEHIND.clone()))
        .expect("Metric successfully registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("Metric successfully registered");
}

/// Serves `/metrics` until the process exits.
pub async fn start(
    prometheus_settings: &settings::Prometheus,
    logger: &slog::Logger,
) -> anyhow::Result<()> {
    let logger = logger.new(o!(COMPONENT_KEY => "prometheus-metrics"));
    slog::info!(
        logger,
        "Starting metrics server on {}:{}",
        prometheus_settings.hostname,
        prometheus_settings.port
    );

    warp::serve(
        warp::any()
            .and(warp::path("metrics"))
            .and(warp::path::end())
            .map(|| metrics_handler()),
    )
    .run((
        prometheus_settings.hostname.parse::<IpAddr>()?,
        prometheus_settings.port,
    ))
    .await;

    Ok(())
}

fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        eprintln!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
