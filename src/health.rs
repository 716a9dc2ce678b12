//! Health monitor for the indexer, allowing external services to query
//! whether it is able to make progress. Returns HTTP 200 on
//! {hostname}:{port}/health while the synchronizer is advancing and the
//! message queue transport is connected, 503 otherwise.

use std::sync::Arc;

use anyhow::Context;
use slog::o;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use crate::{logging::COMPONENT_KEY, mq::IMQClient, settings, sync::SyncState};

pub struct HealthChecker<MQ> {
    listener: TcpListener,
    sync_state: Arc<SyncState>,
    mq_client: Arc<MQ>,
    logger: slog::Logger,
}

// Split running of health checker into new and run so we can ensure TcpListener is active before
// proceeding in tests
impl<MQ: IMQClient> HealthChecker<MQ> {
    pub async fn new(
        health_check_settings: &settings::HealthCheck,
        sync_state: Arc<SyncState>,
        mq_client: Arc<MQ>,
        logger: &slog::Logger,
    ) -> anyhow::Result<Self> {
        let bind_address = format!(
            "{}:{}",
            health_check_settings.hostname, health_check_settings.port
        );
        let logger = logger
            .new(o!(COMPONENT_KEY => "health-check", "bind-address" => bind_address.clone()));

        slog::info!(logger, "Starting");

        Ok(Self {
            listener: TcpListener::bind(&bind_address)
                .await
                .with_context(|| format!("Could not bind TCP listener to {}", bind_address))?,
            sync_state,
            mq_client,
            logger,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((mut stream, _address)) => {
                    let mut buffer = [0; 1024];
                    stream
                        .read(&mut buffer)
                        .await
                        .context("Couldn't read stream into buffer")?;

                    let mut headers = [httparse::EMPTY_HEADER; 16];
                    let mut request = httparse::Request::new(&mut headers);
                    match request.parse(&buffer) {
                        Ok(_) => {
                            if request.path.eq(&Some("/health")) {
                                let response = if self.sync_state.is_healthy()
                                    && self.mq_client.is_healthy()
                                {
                                    "HTTP/1.1 200 OK\r\n\r\n"
                                } else {
                                    "HTTP/1.1 503 Service Unavailable\r\n\r\n"
                                };
                                stream
                                    .write_all(response.as_bytes())
                                    .await
                                    .context("Could not write to health check stream")?;
                                stream
                                    .flush()
                                    .await
                                    .context("Could not flush health check TCP stream")?;
                            } else {
                                slog::warn!(
                                    self.logger,
                                    "Requested health at invalid path: {:?}",
                                    request.path
                                );
                            }
                        }
                        Err(error) => {
                            slog::warn!(
                                self.logger,
                                "Invalid health check request, could not parse: {}",
                                error,
                            );
                        }
                    }
                }
                Err(error) => {
                    slog::error!(
                        self.logger,
                        "Could not open health check TCP stream: {}",
                        error
                    );
                }
            }
        }
    }
}
