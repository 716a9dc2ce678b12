use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use web3::types::{Log, H160, H256, U256};

/// Serialize 256-bit integers as decimal strings so downstream consumers in
/// any language can parse them without precision loss.
pub mod u256_decimal {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use web3::types::U256;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(D::Error::custom)
    }
}

/// As [u256_decimal], for `uint256[]` parameters.
pub mod u256_decimal_vec {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use web3::types::U256;

    pub fn serialize<S: Serializer>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<U256>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| U256::from_dec_str(&s).map_err(D::Error::custom))
            .collect()
    }
}

/// Decoded parameters for every event the indexer understands.
///
/// The set is closed on purpose: adding an event means adding a variant and a
/// decoder arm at compile time, there is no runtime registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    OrderFilled {
        order_hash: H256,
        maker: H160,
        taker: H160,
        #[serde(with = "u256_decimal")]
        maker_asset_id: U256,
        #[serde(with = "u256_decimal")]
        taker_asset_id: U256,
        #[serde(with = "u256_decimal")]
        maker_amount_filled: U256,
        #[serde(with = "u256_decimal")]
        taker_amount_filled: U256,
        #[serde(with = "u256_decimal")]
        fee: U256,
    },
    OrderCancelled {
        order_hash: H256,
    },
    TokenRegistered {
        #[serde(with = "u256_decimal")]
        token0: U256,
        #[serde(with = "u256_decimal")]
        token1: U256,
        condition_id: H256,
    },
    TransferSingle {
        operator: H160,
        from: H160,
        to: H160,
        #[serde(with = "u256_decimal")]
        token_id: U256,
        #[serde(with = "u256_decimal")]
        amount: U256,
    },
    TransferBatch {
        operator: H160,
        from: H160,
        to: H160,
        #[serde(with = "u256_decimal_vec")]
        token_ids: Vec<U256>,
        #[serde(with = "u256_decimal_vec")]
        amounts: Vec<U256>,
    },
    ConditionPreparation {
        condition_id: H256,
        oracle: H160,
        question_id: H256,
        outcome_slot_count: u8,
    },
    ConditionResolution {
        condition_id: H256,
        oracle: H160,
        question_id: H256,
        outcome_slot_count: u8,
        #[serde(with = "u256_decimal_vec")]
        payout_numerators: Vec<U256>,
    },
    PositionSplit {
        stakeholder: H160,
        collateral_token: H160,
        parent_collection_id: H256,
        condition_id: H256,
        #[serde(with = "u256_decimal_vec")]
        partition: Vec<U256>,
        #[serde(with = "u256_decimal")]
        amount: U256,
    },
    PositionsMerge {
        stakeholder: H160,
        collateral_token: H160,
        parent_collection_id: H256,
        condition_id: H256,
        #[serde(with = "u256_decimal_vec")]
        partition: Vec<U256>,
        #[serde(with = "u256_decimal")]
        amount: U256,
    },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::OrderFilled { .. } => "OrderFilled",
            EventPayload::OrderCancelled { .. } => "OrderCancelled",
            EventPayload::TokenRegistered { .. } => "TokenRegistered",
            EventPayload::TransferSingle { .. } => "TransferSingle",
            EventPayload::TransferBatch { .. } => "TransferBatch",
            EventPayload::ConditionPreparation { .. } => "ConditionPreparation",
            EventPayload::ConditionResolution { .. } => "ConditionResolution",
            EventPayload::PositionSplit { .. } => "PositionSplit",
            EventPayload::PositionsMerge { .. } => "PositionsMerge",
        }
    }
}

/// A decoded event together with its on-chain context, as published to the
/// message queue. `(tx_hash, log_index)` uniquely identifies an envelope and
/// forms its deduplication key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub block_number: u64,
    pub block_hash: H256,
    pub tx_hash: H256,
    pub tx_index: u32,
    pub log_index: u32,
    pub contract_address: H160,
    pub event_name: String,
    pub event_signature: H256,
    pub timestamp: u64,
    pub success: bool,
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Builds an envelope from a log that has already been decoded. Fails if
    /// the log is missing the context fields a mined log always carries.
    pub fn from_log(log: &Log, timestamp: u64, payload: EventPayload) -> Result<Self> {
        let event_signature = *log
            .topics
            .first()
            .ok_or_else(|| anyhow!("Could not get event signature from ETH log"))?;
        Ok(Self {
            block_number: log
                .block_number
                .ok_or_else(|| anyhow!("Could not get block number from ETH log"))?
                .as_u64(),
            block_hash: log
                .block_hash
                .ok_or_else(|| anyhow!("Could not get block hash from ETH log"))?,
            tx_hash: log
                .transaction_hash
                .ok_or_else(|| anyhow!("Could not get transaction hash from ETH log"))?,
            tx_index: checked_u32(
                log.transaction_index
                    .ok_or_else(|| anyhow!("Could not get transaction index from ETH log"))?
                    .as_u64(),
                "transaction index",
            )?,
            log_index: {
                let log_index = log
                    .log_index
                    .ok_or_else(|| anyhow!("Could not get log index from ETH log"))?;
                if log_index > U256::from(u32::MAX) {
                    bail!("Log index out of range: {}", log_index);
                }
                log_index.as_u32()
            },
            contract_address: log.address,
            event_name: payload.name().to_string(),
            event_signature,
            timestamp,
            success: !log.removed.unwrap_or(false),
            payload,
        })
    }

    /// Deduplication key understood by the message queue: `<tx_hash>-<log_index>`.
    pub fn dedup_key(&self) -> String {
        format!("{:#x}-{}", self.tx_hash, self.log_index)
    }
}

fn checked_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{} out of range: {}", what, value))
}
