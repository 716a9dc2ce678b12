pub mod block_processor;
pub mod conditional_tokens;
pub mod event;
pub mod exchange;
pub mod router;
pub mod rpc;
pub mod utils;

use anyhow::Result;
use thiserror::Error;
use web3::{
    ethabi::{self, Contract},
    types::H256,
};

/// Errors produced while decoding a log whose signature is registered with
/// the router. Unknown signatures are not an error, they are skipped before
/// a decoder is ever invoked.
#[derive(Error, Debug)]
pub enum EventDecodeError {
    #[error("Cannot decode missing parameter: '{0}'")]
    MissingParam(String),
    #[error("Malformed log: {0}")]
    MalformedLog(String),
    #[error("Mismatched lengths for '{name}': {left} != {right}")]
    LengthMismatch {
        name: &'static str,
        left: usize,
        right: usize,
    },
}

// The signature is recalculated on each Event::signature() call, so we use this structure to
// cache the signature
pub struct SignatureAndEvent {
    pub signature: H256,
    pub event: ethabi::Event,
}

impl SignatureAndEvent {
    pub fn new(contract: &Contract, name: &str) -> Result<Self> {
        let event = contract.event(name)?;
        Ok(Self {
            signature: event.signature(),
            event: event.clone(),
        })
    }
}
