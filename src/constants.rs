use std::time::Duration;

// ======= Message queue =======

/// How many times a publish is re-attempted while the NATS connection is
/// re-establishing before the error is handed to the synchronizer.
pub const MQ_PUBLISH_RETRY_ATTEMPTS: usize = 5;

/// Pause between publish re-attempts on a disconnected transport.
pub const MQ_PUBLISH_RETRY_INTERVAL: Duration = Duration::from_secs(1);

// ======= Settings environment variables =======

/// Prefix for environment overrides of `config/default.toml` values,
/// e.g. `INDEXER__ETH__HTTP_ENDPOINT` or `INDEXER__MESSAGE_QUEUE__ENDPOINT`.
pub const ENV_PREFIX: &str = "INDEXER";
pub const ENV_SEPARATOR: &str = "__";
