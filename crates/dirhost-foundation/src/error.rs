//! Error handling for the dirhost application host

use thiserror::Error;

/// Core error type used throughout the host
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HostError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to load '{script}': {message}")]
    Load { script: String, message: String },

    #[error("Failed to watch directory '{directory}': {message}")]
    Watch { directory: String, message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Teardown failed for {}", describe_failures(.failures))]
    Teardown { failures: Vec<(String, String)> },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HostError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new load error for a script
    pub fn load(script: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Load {
            script: script.into(),
            message: message.to_string(),
        }
    }

    /// Create a new watch error for a directory
    pub fn watch(directory: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Watch {
            directory: directory.into(),
            message: message.to_string(),
        }
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a teardown error from per-directory failures
    pub fn teardown(failures: Vec<(String, String)>) -> Self {
        Self::Teardown { failures }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error means "nothing there" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<anyhow::Error> for HostError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

fn describe_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(key, message)| format!("{} ({})", key, message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for convenience
pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_message_lists_every_failure() {
        let err = HostError::teardown(vec![
            ("/site/a".to_string(), "socket busy".to_string()),
            ("/site/b".to_string(), "timed out".to_string()),
        ]);
        let message = err.to_string();
        assert_eq!(
            message,
            "Teardown failed for /site/a (socket busy), /site/b (timed out)"
        );
    }

    #[test]
    fn test_load_error_names_script() {
        let err = HostError::load("/site/blog/index.js", "syntax error");
        assert_eq!(
            err.to_string(),
            "Failed to load '/site/blog/index.js': syntax error"
        );
        assert!(!err.is_not_found());
        assert!(HostError::not_found("x").is_not_found());
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err: HostError = anyhow::anyhow!("inner")
            .context("outer")
            .into();
        assert_eq!(err.to_string(), "Internal error: outer: inner");
    }
}
