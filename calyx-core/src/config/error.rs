use thiserror::Error;

/// Configuration loading and validation errors. All of these abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config: {0}")]
    ParseError(String),
    #[error("failed to serialize config: {0}")]
    SerializeError(String),
    #[error("failed to write config file: {0}")]
    FileWriteError(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}
