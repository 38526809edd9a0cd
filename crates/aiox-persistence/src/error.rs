//! Errores de persistencia y de configuración.
//! `PersistenceError` se traduce a `CoreEngineError::LogWrite` en la frontera
//! con el core: para el executor cualquier fallo del store es un fallo del log.

use aiox_core::CoreEngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io: {0}")]
    Io(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("corrupt log line at byte {offset}: {reason}")]
    CorruptLine { offset: u64, reason: String },
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PersistenceError> for CoreEngineError {
    fn from(err: PersistenceError) -> Self {
        CoreEngineError::LogWrite(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid { var: String, value: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(var: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid { var: var.to_string(),
                        value: value.to_string(),
                        reason: reason.into() }
    }
}
