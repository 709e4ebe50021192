use tracing::Level;

/// Environment variable that overrides the default log level.
pub const LOG_LEVEL_ENV: &str = "DXL_LOG";

/// Initialize tracing for an embedding host.
///
/// The level comes from `DXL_LOG` when set, otherwise from `default_level`.
pub fn init(default_level: &str) {
    let requested = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());

    // try_init so tests and repeated embeddings do not panic
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(&requested))
        .with_target(true)
        .try_init();
}

pub(crate) fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
