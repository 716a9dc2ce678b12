//! Decoders for the events emitted by the multi-outcome (ERC-1155)
//! conditional tokens contract.
//!
//! `TransferBatch`, `ConditionResolution`, `PositionSplit` and
//! `PositionsMerge` carry `uint256[]` parameters, so their data sections use
//! the ABI head/tail offset layout rather than fixed word offsets.

use anyhow::Result;
use web3::{
    ethabi::{self, RawLog},
    types::{H160, H256, U256},
};

use super::{
    event::EventPayload,
    utils::{decode_log_param, parse_log},
    EventDecodeError, SignatureAndEvent,
};

/// A wrapper for the conditional tokens Ethereum contract.
pub struct ConditionalTokens {
    pub deployed_address: H160,
    transfer_single: SignatureAndEvent,
    transfer_batch: SignatureAndEvent,
    condition_preparation: SignatureAndEvent,
    condition_resolution: SignatureAndEvent,
    position_split: SignatureAndEvent,
    positions_merge: SignatureAndEvent,
}

impl ConditionalTokens {
    /// Loads the contract abi to get event definitions
    pub fn new(deployed_address: H160) -> Result<Self> {
        let contract =
            ethabi::Contract::load(std::include_bytes!("abis/ConditionalTokens.json").as_ref())?;
        Ok(Self {
            deployed_address,
            transfer_single: SignatureAndEvent::new(&contract, "TransferSingle")?,
            transfer_batch: SignatureAndEvent::new(&contract, "TransferBatch")?,
            condition_preparation: SignatureAndEvent::new(&contract, "ConditionPreparation")?,
            condition_resolution: SignatureAndEvent::new(&contract, "ConditionResolution")?,
            position_split: SignatureAndEvent::new(&contract, "PositionSplit")?,
            positions_merge: SignatureAndEvent::new(&contract, "PositionsMerge")?,
        })
    }

    /// Decodes a raw log emitted by the conditional tokens contract. Returns
    /// `None` when `signature` is not one of its events.
    pub fn decode(&self, signature: H256, raw_log: RawLog) -> Result<Option<EventPayload>> {
        if signature == self.transfer_single.signature {
            let log = parse_log(&self.transfer_single.event, raw_log)?;
            Ok(Some(EventPayload::TransferSingle {
                operator: decode_log_param(&log, "operator")?,
                from: decode_log_param(&log, "from")?,
                to: decode_log_param(&log, "to")?,
                token_id: decode_log_param(&log, "id")?,
                amount: decode_log_param(&log, "value")?,
            }))
        } else if signature == self.transfer_batch.signature {
            let log = parse_log(&self.transfer_batch.event, raw_log)?;
            let token_ids: Vec<U256> = decode_log_param(&log, "ids")?;
            let amounts: Vec<U256> = decode_log_param(&log, "values")?;
            if token_ids.len() != amounts.len() {
                return Err(EventDecodeError::LengthMismatch {
                    name: "TransferBatch ids/values",
                    left: token_ids.len(),
                    right: amounts.len(),
                }
                .into());
            }
            Ok(Some(EventPayload::TransferBatch {
                operator: decode_log_param(&log, "operator")?,
                from: decode_log_param(&log, "from")?,
                to: decode_log_param(&log, "to")?,
                token_ids,
                amounts,
            }))
        } else if signature == self.condition_preparation.signature {
            let log = parse_log(&self.condition_preparation.event, raw_log)?;
            Ok(Some(EventPayload::ConditionPreparation {
                condition_id: decode_log_param(&log, "conditionId")?,
                oracle: decode_log_param(&log, "oracle")?,
                question_id: decode_log_param(&log, "questionId")?,
                outcome_slot_count: outcome_slot_count_u8(decode_log_param(
                    &log,
                    "outcomeSlotCount",
                )?)?,
            }))
        } else if signature == self.condition_resolution.signature {
            let log = parse_log(&self.condition_resolution.event, raw_log)?;
            let outcome_slot_count =
                outcome_slot_count_u8(decode_log_param(&log, "outcomeSlotCount")?)?;
            let payout_numerators: Vec<U256> = decode_log_param(&log, "payoutNumerators")?;
            if payout_numerators.len() != outcome_slot_count as usize {
                return Err(EventDecodeError::LengthMismatch {
                    name: "ConditionResolution payoutNumerators/outcomeSlotCount",
                    left: payout_numerators.len(),
                    right: outcome_slot_count as usize,
                }
                .into());
            }
            Ok(Some(EventPayload::ConditionResolution {
                condition_id: decode_log_param(&log, "conditionId")?,
                oracle: decode_log_param(&log, "oracle")?,
                question_id: decode_log_param(&log, "questionId")?,
                outcome_slot_count,
                payout_numerators,
            }))
        } else if signature == self.position_split.signature {
            let log = parse_log(&self.position_split.event, raw_log)?;
            Ok(Some(EventPayload::PositionSplit {
                stakeholder: decode_log_param(&log, "stakeholder")?,
                collateral_token: decode_log_param(&log, "collateralToken")?,
                parent_collection_id: decode_log_param(&log, "parentCollectionId")?,
                condition_id: decode_log_param(&log, "conditionId")?,
                partition: decode_log_param(&log, "partition")?,
                amount: decode_log_param(&log, "amount")?,
            }))
        } else if signature == self.positions_merge.signature {
            let log = parse_log(&self.positions_merge.event, raw_log)?;
            Ok(Some(EventPayload::PositionsMerge {
                stakeholder: decode_log_param(&log, "stakeholder")?,
                collateral_token: decode_log_param(&log, "collateralToken")?,
                parent_collection_id: decode_log_param(&log, "parentCollectionId")?,
                condition_id: decode_log_param(&log, "conditionId")?,
                partition: decode_log_param(&log, "partition")?,
                amount: decode_log_param(&log, "amount")?,
            }))
        } else {
            Ok(None)
        }
    }
}

/// The contract emits `outcomeSlotCount` as a `uint256` but the protocol caps
/// conditions at 256 outcome slots.
fn outcome_slot_count_u8(value: U256) -> Result<u8> {
    if value > U256::from(u8::MAX) {
        Err(EventDecodeError::MalformedLog(format!("outcomeSlotCount out of range: {}", value))
            .into())
    } else {
        Ok(value.as_u32() as u8)
    }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use crate::eth::EventDecodeError;

    use super::*;

    const OPERATOR: &str = "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e";
    const FROM: &str = "0x2791bca1f2de4661ed88a30c99a7a9449aa84174";
    const TO: &str = "0xd6f5c46d4e1a02f9d621cf40c0fb577cbe6e19db";
    const ORACLE: &str = "0x6a9d222616c90fca5754cd1333cfd9b7fb6a4f74";
    const CONDITION_ID: &str = "0xbcaf101d9238ab903eebd8cdbd4a4eb2da591d1e0ac80f0b6d60b516025a52f9";
    const QUESTION_ID: &str = "0x7061796f75745f7175657374696f6e5f69645f303030303030303030303031ff";

    fn contract() -> ConditionalTokens {
        ConditionalTokens::new(H160::default()).unwrap()
    }

    fn address_topic(address: &str) -> H256 {
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(H160::from_str(address).unwrap().as_bytes());
        H256::from(topic)
    }

    #[test]
    fn event_signatures_are_canonical() {
        let contract = contract();
        assert_eq!(
            contract.transfer_single.signature,
            H256::from_str("0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62")
                .unwrap()
        );
        assert_eq!(
            contract.transfer_batch.signature,
            H256::from_str("0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb")
                .unwrap()
        );
        assert_eq!(
            contract.condition_preparation.signature,
            H256::from_str("0xab3760c3bd2bb38b5bcf54dc79802ed67338b4cf29f3054ded67ed24661e4177")
                .unwrap()
        );
        assert_eq!(
            contract.condition_resolution.signature,
            H256::from_str("0xb44d84d3289691f71497564b85d4233648d9dbae8cbdbb4329f301c3a0185894")
                .unwrap()
        );
        assert_eq!(
            contract.position_split.signature,
            H256::from_str("0x2e6bb91f8cbcda0c93623c54d0403a43514fabc40084ec96b6d5379a74786298")
                .unwrap()
        );
        assert_eq!(
            contract.positions_merge.signature,
            H256::from_str("0x6f13ca62553fcc2bcd2372180a43949c1e4cebba603901ede2f4e14f36b282ca")
                .unwrap()
        );
    }

    #[test]
    fn transfer_single_log_parsing() {
        let contract = contract();
        let signature = contract.transfer_single.signature;

        match contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        address_topic(OPERATOR),
                        address_topic(FROM),
                        address_topic(TO),
                    ],
                    data: hex::decode(
                        "91a6c94bd38ff7681108ac9511559cead2e518d00514531f66525186d074fb7f00000000000000000000000000000000000000000000000000000000017d7840",
                    )
                    .unwrap(),
                },
            )
            .unwrap()
            .unwrap()
        {
            EventPayload::TransferSingle {
                operator,
                from,
                to,
                token_id,
                amount,
            } => {
                assert_eq!(operator, H160::from_str(OPERATOR).unwrap());
                assert_eq!(from, H160::from_str(FROM).unwrap());
                assert_eq!(to, H160::from_str(TO).unwrap());
                assert_eq!(
                    token_id,
                    U256::from_dec_str(
                        "65880048952618660949385071164324266989214968284423116498174289812163940121471"
                    )
                    .unwrap()
                );
                assert_eq!(amount, U256::from(25_000_000u64));
            }
            event => panic!("Expected EventPayload::TransferSingle, got {:?}", event),
        }
    }

    fn transfer_batch_raw_log(contract: &ConditionalTokens) -> RawLog {
        RawLog {
            topics: vec![
                contract.transfer_batch.signature,
                address_topic(OPERATOR),
                address_topic(FROM),
                address_topic(TO),
            ],
            data: hex::decode(concat!(
                "0000000000000000000000000000000000000000000000000000000000000040",
                "00000000000000000000000000000000000000000000000000000000000000c0",
                "0000000000000000000000000000000000000000000000000000000000000003",
                "0000000000000000000000000000000000000000000000000000000000002b67",
                "00000000000000000000000000000000000000000000000000000000000056ce",
                "0000000000000000000000000000000000000000000000000000000000008235",
                "0000000000000000000000000000000000000000000000000000000000000003",
                "00000000000000000000000000000000000000000000000000000000000f4240",
                "00000000000000000000000000000000000000000000000000000000001e8480",
                "00000000000000000000000000000000000000000000000000000000002dc6c0",
            ))
            .unwrap(),
        }
    }

    #[test]
    fn transfer_batch_honors_abi_offset_table() {
        let contract = contract();
        let raw_log = transfer_batch_raw_log(&contract);
        let signature = raw_log.topics[0];

        match contract.decode(signature, raw_log).unwrap().unwrap() {
            EventPayload::TransferBatch {
                operator,
                from,
                to,
                token_ids,
                amounts,
            } => {
                assert_eq!(operator, H160::from_str(OPERATOR).unwrap());
                assert_eq!(from, H160::from_str(FROM).unwrap());
                assert_eq!(to, H160::from_str(TO).unwrap());
                assert_eq!(
                    token_ids,
                    vec![U256::from(11111u64), U256::from(22222u64), U256::from(33333u64)]
                );
                assert_eq!(
                    amounts,
                    vec![
                        U256::from(1_000_000u64),
                        U256::from(2_000_000u64),
                        U256::from(3_000_000u64)
                    ]
                );
            }
            event => panic!("Expected EventPayload::TransferBatch, got {:?}", event),
        }
    }

    #[test]
    fn transfer_batch_rejects_unequal_array_lengths() {
        let contract = contract();
        let signature = contract.transfer_batch.signature;

        // 2 ids but 3 values
        let error = contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        address_topic(OPERATOR),
                        address_topic(FROM),
                        address_topic(TO),
                    ],
                    data: hex::decode(concat!(
                        "0000000000000000000000000000000000000000000000000000000000000040",
                        "00000000000000000000000000000000000000000000000000000000000000a0",
                        "0000000000000000000000000000000000000000000000000000000000000002",
                        "0000000000000000000000000000000000000000000000000000000000002b67",
                        "00000000000000000000000000000000000000000000000000000000000056ce",
                        "0000000000000000000000000000000000000000000000000000000000000003",
                        "00000000000000000000000000000000000000000000000000000000000f4240",
                        "00000000000000000000000000000000000000000000000000000000001e8480",
                        "00000000000000000000000000000000000000000000000000000000002dc6c0",
                    ))
                    .unwrap(),
                },
            )
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<EventDecodeError>(),
            Some(EventDecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn transfer_batch_rejects_truncated_tail() {
        let contract = contract();
        let mut raw_log = transfer_batch_raw_log(&contract);
        // cut into the second array's elements
        raw_log.data.truncate(raw_log.data.len() - 40);
        let signature = raw_log.topics[0];

        let error = contract.decode(signature, raw_log).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<EventDecodeError>(),
            Some(EventDecodeError::MalformedLog(_))
        ));
    }

    #[test]
    fn condition_preparation_log_parsing() {
        let contract = contract();
        let signature = contract.condition_preparation.signature;

        match contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        H256::from_str(CONDITION_ID).unwrap(),
                        address_topic(ORACLE),
                        H256::from_str(QUESTION_ID).unwrap(),
                    ],
                    data: hex::decode(
                        "0000000000000000000000000000000000000000000000000000000000000002",
                    )
                    .unwrap(),
                },
            )
            .unwrap()
            .unwrap()
        {
            EventPayload::ConditionPreparation {
                condition_id,
                oracle,
                question_id,
                outcome_slot_count,
            } => {
                assert_eq!(condition_id, H256::from_str(CONDITION_ID).unwrap());
                assert_eq!(oracle, H160::from_str(ORACLE).unwrap());
                assert_eq!(question_id, H256::from_str(QUESTION_ID).unwrap());
                assert_eq!(outcome_slot_count, 2);
            }
            event => panic!("Expected EventPayload::ConditionPreparation, got {:?}", event),
        }
    }

    #[test]
    fn condition_resolution_log_parsing() {
        let contract = contract();
        let signature = contract.condition_resolution.signature;

        match contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        H256::from_str(CONDITION_ID).unwrap(),
                        address_topic(ORACLE),
                        H256::from_str(QUESTION_ID).unwrap(),
                    ],
                    data: hex::decode(concat!(
                        "0000000000000000000000000000000000000000000000000000000000000002",
                        "0000000000000000000000000000000000000000000000000000000000000040",
                        "0000000000000000000000000000000000000000000000000000000000000002",
                        "0000000000000000000000000000000000000000000000000000000000000001",
                        "0000000000000000000000000000000000000000000000000000000000000000",
                    ))
                    .unwrap(),
                },
            )
            .unwrap()
            .unwrap()
        {
            EventPayload::ConditionResolution {
                condition_id,
                oracle,
                question_id,
                outcome_slot_count,
                payout_numerators,
            } => {
                assert_eq!(condition_id, H256::from_str(CONDITION_ID).unwrap());
                assert_eq!(oracle, H160::from_str(ORACLE).unwrap());
                assert_eq!(question_id, H256::from_str(QUESTION_ID).unwrap());
                assert_eq!(outcome_slot_count, 2);
                assert_eq!(payout_numerators, vec![U256::from(1u64), U256::zero()]);
            }
            event => panic!("Expected EventPayload::ConditionResolution, got {:?}", event),
        }
    }

    #[test]
    fn condition_resolution_rejects_wrong_payout_count() {
        let contract = contract();
        let signature = contract.condition_resolution.signature;

        // outcomeSlotCount of 3 but only 2 payout numerators
        let error = contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        H256::from_str(CONDITION_ID).unwrap(),
                        address_topic(ORACLE),
                        H256::from_str(QUESTION_ID).unwrap(),
                    ],
                    data: hex::decode(concat!(
                        "0000000000000000000000000000000000000000000000000000000000000003",
                        "0000000000000000000000000000000000000000000000000000000000000040",
                        "0000000000000000000000000000000000000000000000000000000000000002",
                        "0000000000000000000000000000000000000000000000000000000000000001",
                        "0000000000000000000000000000000000000000000000000000000000000000",
                    ))
                    .unwrap(),
                },
            )
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<EventDecodeError>(),
            Some(EventDecodeError::LengthMismatch { .. })
        ));
    }

    fn split_merge_data() -> Vec<u8> {
        hex::decode(concat!(
            "0000000000000000000000002791bca1f2de4661ed88a30c99a7a9449aa84174",
            "0000000000000000000000000000000000000000000000000000000000000060",
            "00000000000000000000000000000000000000000000000000000000004c4b40",
            "0000000000000000000000000000000000000000000000000000000000000002",
            "0000000000000000000000000000000000000000000000000000000000000001",
            "0000000000000000000000000000000000000000000000000000000000000002",
        ))
        .unwrap()
    }

    #[test]
    fn position_split_log_parsing() {
        let contract = contract();
        let signature = contract.position_split.signature;
        const STAKEHOLDER: &str = "0x91430cad2d3975766499717fa0d66a78d814e5c5";

        match contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        address_topic(STAKEHOLDER),
                        H256::zero(),
                        H256::from_str(CONDITION_ID).unwrap(),
                    ],
                    data: split_merge_data(),
                },
            )
            .unwrap()
            .unwrap()
        {
            EventPayload::PositionSplit {
                stakeholder,
                collateral_token,
                parent_collection_id,
                condition_id,
                partition,
                amount,
            } => {
                assert_eq!(stakeholder, H160::from_str(STAKEHOLDER).unwrap());
                assert_eq!(collateral_token, H160::from_str(FROM).unwrap());
                assert_eq!(parent_collection_id, H256::zero());
                assert_eq!(condition_id, H256::from_str(CONDITION_ID).unwrap());
                assert_eq!(partition, vec![U256::from(1u64), U256::from(2u64)]);
                assert_eq!(amount, U256::from(5_000_000u64));
            }
            event => panic!("Expected EventPayload::PositionSplit, got {:?}", event),
        }
    }

    #[test]
    fn positions_merge_log_parsing() {
        let contract = contract();
        let signature = contract.positions_merge.signature;
        const STAKEHOLDER: &str = "0x91430cad2d3975766499717fa0d66a78d814e5c5";

        match contract
            .decode(
                signature,
                RawLog {
                    topics: vec![
                        signature,
                        address_topic(STAKEHOLDER),
                        H256::zero(),
                        H256::from_str(CONDITION_ID).unwrap(),
                    ],
                    data: split_merge_data(),
                },
            )
            .unwrap()
            .unwrap()
        {
            EventPayload::PositionsMerge {
                stakeholder,
                partition,
                amount,
                ..
            } => {
                assert_eq!(stakeholder, H160::from_str(STAKEHOLDER).unwrap());
                assert_eq!(partition, vec![U256::from(1u64), U256::from(2u64)]);
                assert_eq!(amount, U256::from(5_000_000u64));
            }
            event => panic!("Expected EventPayload::PositionsMerge, got {:?}", event),
        }
    }
}
