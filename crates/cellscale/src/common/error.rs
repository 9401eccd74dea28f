use thiserror::Error;

#[derive(Debug, Error)]
pub enum CellScaleError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl From<serde_json::error::Error> for CellScaleError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for CellScaleError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn config_error<T>(message: String) -> crate::Result<T> {
    Err(CellScaleError::ConfigError(message))
}
