pub mod nats_client;

#[cfg(test)]
pub mod mq_mock;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use web3::types::H160;

/// Three-level subject `<prefix>.<event_name>.<contract_address>`, so
/// consumers can subscribe to everything under a prefix, to one event kind,
/// or to one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    prefix: String,
    event_name: String,
    contract_address: H160,
}

impl Subject {
    pub fn new(prefix: &str, event_name: &str, contract_address: H160) -> Self {
        Self {
            prefix: prefix.to_string(),
            event_name: event_name.to_string(),
            contract_address,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{:#x}",
            self.prefix, self.event_name, self.contract_address
        )
    }
}

/// Interface for the durable message queue the decoded events are published
/// onto.
#[async_trait]
pub trait IMQClient: Send + Sync {
    /// Publish something to a particular subject. `dedup_key` identifies the
    /// message inside the queue's deduplication window, so replaying a block
    /// range is safe.
    async fn publish<M: Serialize + Sync>(
        &self,
        subject: &Subject,
        dedup_key: &str,
        message: &M,
    ) -> Result<()>;

    /// Whether the underlying transport is currently connected.
    fn is_healthy(&self) -> bool;
}
