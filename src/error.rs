use thiserror::Error;

/// Shake detector error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShakeError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),
}

/// Result type for detector operations
pub type ShakeResult<T> = Result<T, ShakeError>;

impl ShakeError {
    pub fn config(msg: impl Into<String>) -> Self {
        ShakeError::Configuration(msg.into())
    }
}
