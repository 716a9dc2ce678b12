use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{IMQClient, Subject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub dedup_key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct MockMQInner {
    published: Vec<PublishedMessage>,
    seen_dedup_keys: HashSet<String>,
    healthy: bool,
    fail_next_publishes: usize,
}

/// In-process [IMQClient] that records publishes and emulates the server-side
/// deduplication window with a seen-set.
#[derive(Clone)]
pub struct MockMQClient {
    inner: Arc<Mutex<MockMQInner>>,
}

impl MockMQClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockMQInner {
                healthy: true,
                ..Default::default()
            })),
        }
    }

    /// Messages that made it past deduplication, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.lock().unwrap().healthy = healthy;
    }

    /// Makes the next `n` publishes fail, to exercise retry paths.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner.lock().unwrap().fail_next_publishes = n;
    }
}

#[async_trait]
impl IMQClient for MockMQClient {
    async fn publish<M: Serialize + Sync>(
        &self,
        subject: &Subject,
        dedup_key: &str,
        message: &M,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_publishes > 0 {
            inner.fail_next_publishes -= 1;
            bail!("mock publish failure");
        }
        if inner.seen_dedup_keys.insert(dedup_key.to_string()) {
            inner.published.push(PublishedMessage {
                subject: subject.to_string(),
                dedup_key: dedup_key.to_string(),
                payload: serde_json::to_vec(message)?,
            });
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.inner.lock().unwrap().healthy
    }
}
