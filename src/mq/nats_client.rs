use anyhow::{Context, Result};
use async_nats::{connection::State, header::NATS_MESSAGE_ID, jetstream, HeaderMap};
use async_trait::async_trait;
use serde::Serialize;
use slog::o;

use crate::{
    constants::{MQ_PUBLISH_RETRY_ATTEMPTS, MQ_PUBLISH_RETRY_INTERVAL},
    logging::COMPONENT_KEY,
    settings,
};

use super::{IMQClient, Subject};

/// NATS JetStream-backed implementation of [IMQClient].
///
/// The stream is created (or looked up) at connection time with the
/// configured duplicate window, so `Nats-Msg-Id` headers give us
/// at-least-once, deduplicated delivery across restarts.
#[derive(Clone)]
pub struct NatsMQClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    logger: slog::Logger,
}

impl NatsMQClient {
    pub async fn connect(
        mq_settings: &settings::MessageQueue,
        logger: &slog::Logger,
    ) -> Result<Box<Self>> {
        let logger = logger.new(o!(COMPONENT_KEY => "NatsMQClient"));
        slog::info!(
            logger,
            "Connecting to NATS at {} (stream {})",
            mq_settings.endpoint,
            mq_settings.stream_name
        );

        let client = async_nats::connect(mq_settings.endpoint.as_str())
            .await
            .context("Failed to connect to the NATS server")?;

        let jetstream = jetstream::new(client.clone());
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: mq_settings.stream_name.clone(),
                subjects: vec![format!("{}.>", mq_settings.subject_prefix)],
                duplicate_window: std::time::Duration::from_secs(mq_settings.dedup_window_secs),
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get or create JetStream stream: {}", e))?;

        Ok(Box::new(NatsMQClient {
            client,
            jetstream,
            logger,
        }))
    }

    async fn try_publish(&self, subject: &Subject, dedup_key: &str, bytes: &[u8]) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(NATS_MESSAGE_ID, dedup_key);

        self.jetstream
            .publish_with_headers(subject.to_string(), headers, bytes.to_vec().into())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to publish to subject {}: {}", subject, e))?
            .await
            .map_err(|e| anyhow::anyhow!("Publish to subject {} was not acked: {}", subject, e))?;

        Ok(())
    }
}

#[async_trait]
impl IMQClient for NatsMQClient {
    async fn publish<M: Serialize + Sync>(
        &self,
        subject: &Subject,
        dedup_key: &str,
        message: &M,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(message).context("Failed to serialize message")?;

        // Only transport-level disconnections are retried here. Anything the
        // server actively rejects propagates to the caller.
        let mut attempts = 0;
        loop {
            match self.try_publish(subject, dedup_key, &bytes).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    attempts += 1;
                    if self.is_healthy() || attempts >= MQ_PUBLISH_RETRY_ATTEMPTS {
                        return Err(error);
                    }
                    slog::warn!(
                        self.logger,
                        "NATS disconnected, retrying publish to {} ({}/{})",
                        subject,
                        attempts,
                        MQ_PUBLISH_RETRY_ATTEMPTS
                    );
                    tokio::time::sleep(MQ_PUBLISH_RETRY_INTERVAL).await;
                }
            }
        }
    }

    fn is_healthy(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }
}
