//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config file parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("Config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = ConfigError::Validation("resolver.extensions is empty".into());
        assert_eq!(
            err.to_string(),
            "Config validation error: resolver.extensions is empty"
        );
    }

    #[test]
    fn test_io_keeps_source() {
        use std::error::Error as _;

        let err = ConfigError::Io(
            "kiln.toml".into(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("kiln.toml"));
        assert!(err.source().is_some());
    }
}
