//! Signature-keyed dispatch from raw logs to the event decoders.

use anyhow::Result;
use web3::{
    ethabi::RawLog,
    types::{Log, H160},
};

use super::{
    conditional_tokens::ConditionalTokens, event::EventPayload, exchange::CtfExchange,
};

/// Routes each log to the decoder registered for its first topic.
///
/// The event set is fixed at construction. Logs with no topics, and logs
/// whose signature is not registered, are skipped rather than treated as
/// errors: contract upgrades may add events the indexer does not care about.
/// A registered signature whose log fails to decode is an error.
pub struct EventRouter {
    exchange: CtfExchange,
    conditional_tokens: ConditionalTokens,
}

impl EventRouter {
    pub fn new(exchange_address: H160, conditional_tokens_address: H160) -> Result<Self> {
        Ok(Self {
            exchange: CtfExchange::new(exchange_address)?,
            conditional_tokens: ConditionalTokens::new(conditional_tokens_address)?,
        })
    }

    /// The monitored contract set, used to filter log queries.
    pub fn contract_addresses(&self) -> Vec<H160> {
        vec![
            self.exchange.deployed_address,
            self.conditional_tokens.deployed_address,
        ]
    }

    /// Decodes the payload for a known log, `None` for a skipped one.
    pub fn route(&self, log: &Log) -> Result<Option<EventPayload>> {
        let Some(signature) = log.topics.first().copied() else {
            // anonymous event, nothing to key on
            return Ok(None);
        };

        let raw_log = RawLog {
            topics: log.topics.clone(),
            data: log.data.0.clone(),
        };

        if let Some(payload) = self.exchange.decode(signature, raw_log.clone())? {
            Ok(Some(payload))
        } else if let Some(payload) = self.conditional_tokens.decode(signature, raw_log)? {
            Ok(Some(payload))
        } else {
            Ok(None)
        }
    }
}
