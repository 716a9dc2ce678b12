pub use anyhow::Result;
use regex::Regex;
use url::Url;
use web3::{contract::tokens::Tokenizable, ethabi};

use super::EventDecodeError;

/// Parses a raw log against an event definition. Topic arity and data layout
/// violations surface as [EventDecodeError::MalformedLog].
pub fn parse_log(event: &ethabi::Event, raw_log: ethabi::RawLog) -> Result<ethabi::Log> {
    event
        .parse_log(raw_log)
        .map_err(|e| EventDecodeError::MalformedLog(e.to_string()).into())
}

/// Pulls a named parameter out of a parsed log, with the concrete token type
/// expected by the caller.
pub fn decode_log_param<T: Tokenizable>(log: &ethabi::Log, param_name: &str) -> Result<T> {
    let token = &log
        .params
        .iter()
        .find(|&p| p.name == param_name)
        .ok_or_else(|| EventDecodeError::MissingParam(param_name.to_string()))?
        .value;

    Tokenizable::from_token(token.clone()).map_err(|_| {
        EventDecodeError::MalformedLog(format!("parameter '{}' has an unexpected type", param_name))
            .into()
    })
}

/// parse the URL and check that it is a valid websocket url
pub fn parse_websocket_url(url: &str) -> Result<Url> {
    let issue_list_url = Url::parse(url)?;
    if issue_list_url.scheme() != "ws" && issue_list_url.scheme() != "wss" {
        return Err(anyhow::Error::msg("Wrong scheme"));
    }
    if issue_list_url.host().is_none()
        || issue_list_url.username() != ""
        || issue_list_url.password().is_some()
        || issue_list_url.query().is_some()
        || issue_list_url.fragment().is_some()
        || issue_list_url.cannot_be_a_base()
    {
        return Err(anyhow::Error::msg("Invalid URL data"));
    }

    Ok(issue_list_url)
}

/// checks that the string is formatted as an eth address
pub fn is_eth_address(address: &str) -> Result<()> {
    let re = Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap();
    match re.is_match(address) {
        true => Ok(()),
        false => Err(anyhow::Error::msg(format!(
            "Invalid Eth Address: {}",
            address
        ))),
    }
}

const MAX_SECRET_CHARACTERS_REVEALED: usize = 3;
const SCHEMA_PADDING_LEN: usize = 3;

/// Partially redacts the secret in the url of the node endpoint.
///  eg: `wss://cdcd639308194d3f977a1a5a7ff0d545.rinkeby.ws.rivet.cloud/` -> `wss://cdc****.rinkeby.ws.rivet.cloud/`
pub fn redact_secret_endpoint(endpoint: &str) -> Result<String> {
    let re = Regex::new(r"[0-9a-fA-F]{32}").unwrap();
    if re.is_match(endpoint) {
        // A 32 character hex string was found, redact it
        let mut endpoint_redacted = endpoint.to_string();
        for capture in re.captures_iter(endpoint) {
            endpoint_redacted = endpoint_redacted.replace(
                &capture[0],
                &format!(
                    "{}****",
                    &capture[0]
                        .split_at(capture[0].len().min(MAX_SECRET_CHARACTERS_REVEALED))
                        .0
                ),
            );
        }
        Ok(endpoint_redacted)
    } else {
        // No secret was found, so just redact almost all of the url
        let url = url::Url::parse(endpoint)
            .map_err(anyhow::Error::msg)
            .map_err(|e| e.context("Failed to parse node endpoint into a URL"))?;
        Ok(format!(
            "{}****",
            endpoint
                .split_at(usize::min(
                    url.scheme().len() + SCHEMA_PADDING_LEN + MAX_SECRET_CHARACTERS_REVEALED,
                    endpoint.len()
                ))
                .0
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_eth_address() {
        assert!(is_eth_address("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E").is_ok());
        assert!(is_eth_address("4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E").is_err());
        assert!(is_eth_address("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B898").is_err());
        assert!(is_eth_address("not_an_address").is_err());
    }

    #[test]
    fn test_parse_websocket_url() {
        assert!(parse_websocket_url("wss://network.my_eth_node:80").is_ok());
        assert!(parse_websocket_url("ws://network.my_eth_node:80").is_ok());
        assert!(parse_websocket_url("https://wrong_scheme.com").is_err());
        assert!(parse_websocket_url("no.schema.com").is_err());
    }

    #[test]
    fn test_secret_web_addresses() {
        assert_eq!(
            redact_secret_endpoint("wss://mainnet.infura.io/ws/v3/d52c362116b640b98a166d08d3170a42")
                .unwrap(),
            "wss://mainnet.infura.io/ws/v3/d52****"
        );
        assert_eq!(
            redact_secret_endpoint("wss://cdcd639308194d3f977a1a5a7ff0d545.rinkeby.ws.rivet.cloud/")
                .unwrap(),
            "wss://cdc****.rinkeby.ws.rivet.cloud/"
        );
        // same, but HTTP
        assert_eq!(
            redact_secret_endpoint("https://cdcd639308194d3f977a1a5a7ff0d545.rinkeby.rpc.rivet.cloud/")
                .unwrap(),
            "https://cdc****.rinkeby.rpc.rivet.cloud/"
        );
        assert_eq!(
            redact_secret_endpoint("wss://a").unwrap(),
            "wss://a****"
        );
        assert!(redact_secret_endpoint("no.schema.com").is_err());
    }
}
