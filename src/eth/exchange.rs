//! Decoders for the events emitted by the CTF exchange (order matching)
//! contract.

use anyhow::Result;
use web3::{
    ethabi::{self, RawLog},
    types::{H160, H256},
};

use super::{
    event::EventPayload,
    utils::{decode_log_param, parse_log},
    SignatureAndEvent,
};

/// A wrapper for the CTF exchange Ethereum contract.
pub struct CtfExchange {
    pub deployed_address: H160,
    order_filled: SignatureAndEvent,
    order_cancelled: SignatureAndEvent,
    token_registered: SignatureAndEvent,
}

impl CtfExchange {
    /// Loads the contract abi to get event definitions
    pub fn new(deployed_address: H160) -> Result<Self> {
        let contract =
            ethabi::Contract::load(std::include_bytes!("abis/CTFExchange.json").as_ref())?;
        Ok(Self {
            deployed_address,
            order_filled: SignatureAndEvent::new(&contract, "OrderFilled")?,
            order_cancelled: SignatureAndEvent::new(&contract, "OrderCancelled")?,
            token_registered: SignatureAndEvent::new(&contract, "TokenRegistered")?,
        })
    }

    /// Decodes a raw log emitted by the exchange. Returns `None` when
    /// `signature` is not one of the exchange events.
    pub fn decode(&self, signature: H256, raw_log: RawLog) -> Result<Option<EventPayload>> {
        if signature == self.order_filled.signature {
            let log = parse_log(&self.order_filled.event, raw_log)?;
            Ok(Some(EventPayload::OrderFilled {
                order_hash: decode_log_param(&log, "orderHash")?,
                maker: decode_log_param(&log, "maker")?,
                taker: decode_log_param(&log, "taker")?,
                maker_asset_id: decode_log_param(&log, "makerAssetId")?,
                taker_asset_id: decode_log_param(&log, "takerAssetId")?,
                maker_amount_filled: decode_log_param(&log, "makerAmountFilled")?,
                taker_amount_filled: decode_log_param(&log, "takerAmountFilled")?,
                fee: decode_log_param(&log, "fee")?,
            }))
        } else if signature == self.order_cancelled.signature {
            let log = parse_log(&self.order_cancelled.event, raw_log)?;
            Ok(Some(EventPayload::OrderCancelled {
                order_hash: decode_log_param(&log, "orderHash")?,
            }))
        } else if signature == self.token_registered.signature {
            let log = parse_log(&self.token_registered.event, raw_log)?;
            Ok(Some(EventPayload::TokenRegistered {
                token0: decode_log_param(&log, "token0")?,
                token1: decode_log_param(&log, "token1")?,
                condition_id: decode_log_param(&log, "conditionId")?,
            }))
        } else {
            Ok(None)
        }
    }
}
