//! Errores del core.
//!
//! `CoreEngineError` es serializable porque viaja dentro de las entradas del
//! log de transacciones (`step_end`, `run_end`): el log es el único registro
//! de auditoría y debe conservar el detalle del primer fallo.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum CoreEngineError {
    #[error("path escapes sandbox: {path}")]
    PathEscape { path: String },
    #[error("capability denied: {capability}")]
    CapabilityDenied { capability: String },
    #[error("step '{step_id}' references unbound variable '{reference}'")]
    UnboundReference { step_id: String, reference: String },
    #[error("tool '{op}' failed: {message}")]
    ToolExecution { op: String, message: String },
    #[error("tool '{op}' exceeded its timeout of {timeout_ms} ms")]
    Timeout { op: String, timeout_ms: u64 },
    #[error("quota exceeded: {metric} ({used}/{limit})")]
    QuotaExceeded { metric: String, used: String, limit: String },
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("transaction log write failed: {0}")]
    LogWrite(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("sandbox busy: {0}")]
    SandboxBusy(String),
    #[error("sandbox layout: {0}")]
    SandboxLayout(String),
    #[error("package integrity: expected {expected}, got {actual}")]
    PackageIntegrity { expected: String, actual: String },
    #[error("io: {0}")]
    Io(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreEngineError {
    /// Atajo para errores producidos por la lógica propia de un tool.
    pub fn tool(op: &str, message: impl Into<String>) -> Self {
        Self::ToolExecution { op: op.to_string(),
                              message: message.into() }
    }

    /// Errores que invalidan el run completo aunque ocurran dentro de un step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LogWrite(_) | Self::PathEscape { .. })
    }
}

impl From<std::io::Error> for CoreEngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreEngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

/// Clasificación gruesa de errores (persistida junto a los fallos de step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Policy,
    Containment,
    Runtime,
    Storage,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Policy => "policy",
            ErrorClass::Containment => "containment",
            ErrorClass::Runtime => "runtime",
            ErrorClass::Storage => "storage",
            ErrorClass::Internal => "internal",
        }
    }
}

pub fn classify_error(err: &CoreEngineError) -> ErrorClass {
    match err {
        CoreEngineError::UnboundReference { .. }
        | CoreEngineError::UnknownOperation(_)
        | CoreEngineError::InvalidPlan(_)
        | CoreEngineError::PackageIntegrity { .. } => ErrorClass::Validation,
        CoreEngineError::CapabilityDenied { .. } | CoreEngineError::QuotaExceeded { .. } => ErrorClass::Policy,
        CoreEngineError::PathEscape { .. } | CoreEngineError::SandboxBusy(_) | CoreEngineError::SandboxLayout(_) => {
            ErrorClass::Containment
        }
        CoreEngineError::ToolExecution { .. } | CoreEngineError::Timeout { .. } | CoreEngineError::Cancelled => {
            ErrorClass::Runtime
        }
        CoreEngineError::LogWrite(_) | CoreEngineError::Io(_) => ErrorClass::Storage,
        CoreEngineError::Internal(_) => ErrorClass::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_failing_step_and_reference() {
        let e = CoreEngineError::UnboundReference { step_id: "01-profile".into(),
                                                    reference: "table".into() };
        assert_eq!(e.to_string(), "step '01-profile' references unbound variable 'table'");
    }

    #[test]
    fn serialized_error_is_tagged() {
        let e = CoreEngineError::CapabilityDenied { capability: "net.fetch".into() };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["error"], "capability_denied");
        assert_eq!(v["detail"]["capability"], "net.fetch");
        let back: CoreEngineError = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn classification_covers_taxonomy() {
        assert_eq!(classify_error(&CoreEngineError::PathEscape { path: "../x".into() }), ErrorClass::Containment);
        assert_eq!(classify_error(&CoreEngineError::LogWrite("disk full".into())), ErrorClass::Storage);
        assert_eq!(classify_error(&CoreEngineError::Cancelled), ErrorClass::Runtime);
        assert!(CoreEngineError::LogWrite("x".into()).is_fatal());
        assert!(!CoreEngineError::tool("profile", "boom").is_fatal());
    }
}
