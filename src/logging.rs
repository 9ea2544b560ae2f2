use tracing::Level;

use crate::config::LoggingConfig;

/// Installs the global fmt subscriber at the configured level. Unknown
/// levels fall back to INFO; a second call leaves the first subscriber in
/// place.
pub fn init(config: &LoggingConfig) {
    let level = parse_level(&config.level);
    if tracing_subscriber::fmt().with_max_level(level).try_init().is_err() {
        tracing::debug!("Logging already initialized");
    }
}

pub fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}
