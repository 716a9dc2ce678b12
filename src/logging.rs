// ==== Logging key constants ====
pub const COMPONENT_KEY: &str = "component";

use slog::{o, Drain};

/// Creates the root logger for the service, emitting structured JSON to stdout.
pub fn new_json_logger() -> slog::Logger {
    let drain = slog_json::Json::new(std::io::stdout())
        .add_default_keys()
        .build()
        .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!())
}
