//! Centralized logging initialization with environment variable support

use crate::{HostConfig, LogFormat};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber for the host process
///
/// Environment variables (in priority order):
/// - `RUST_LOG`: Standard Rust log filter (takes precedence over all)
/// - `LOG_FORMAT`: Override format (json, pretty)
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn initialize(config: &HostConfig) {
    let log_level = config
        .logging
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::from_default_env().add_directive(log_level.into());

    let format = format_override().unwrap_or_else(|| config.logging.format.clone());

    // Logs always go to stderr; stdout belongs to the applications
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed, keeping existing one");
    }
}

fn format_override() -> Option<LogFormat> {
    std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|f| match f.to_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" | "human" => Some(LogFormat::Pretty),
            _ => None,
        })
}

/// Span wrapping everything done on behalf of one application directory
pub fn directory_span(directory: &str) -> tracing::Span {
    tracing::info_span!("directory_app", directory = %directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_format_override_parsing() {
        std::env::set_var("LOG_FORMAT", "JSON");
        assert_eq!(format_override(), Some(LogFormat::Json));
        std::env::set_var("LOG_FORMAT", "human");
        assert_eq!(format_override(), Some(LogFormat::Pretty));
        std::env::set_var("LOG_FORMAT", "xml");
        assert_eq!(format_override(), None);
        std::env::remove_var("LOG_FORMAT");
    }

    #[test]
    #[serial]
    fn test_initialize_twice_does_not_panic() {
        let config = HostConfig::default();
        initialize(&config);
        initialize(&config);
    }
}
