//! Lectura tipada de inputs ya resueltos.

use aiox_core::{CoreEngineError, ToolInputs};
use serde_json::Value;

pub(crate) fn required<'a>(op: &str, inputs: &'a ToolInputs, name: &str) -> Result<&'a Value, CoreEngineError> {
    inputs.get(name)
          .ok_or_else(|| CoreEngineError::tool(op, format!("missing input '{name}'")))
}

pub(crate) fn str_arg<'a>(op: &str, inputs: &'a ToolInputs, name: &str) -> Result<&'a str, CoreEngineError> {
    required(op, inputs, name)?.as_str()
                               .ok_or_else(|| CoreEngineError::tool(op, format!("input '{name}' must be a string")))
}

pub(crate) fn f64_arg(op: &str, inputs: &ToolInputs, name: &str) -> Result<f64, CoreEngineError> {
    required(op, inputs, name)?.as_f64()
                               .ok_or_else(|| CoreEngineError::tool(op, format!("input '{name}' must be a number")))
}

pub(crate) fn opt_f64(op: &str, inputs: &ToolInputs, name: &str, default: f64) -> Result<f64, CoreEngineError> {
    match inputs.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => f64_arg(op, inputs, name),
    }
}

pub(crate) fn opt_u64(op: &str, inputs: &ToolInputs, name: &str, default: u64) -> Result<u64, CoreEngineError> {
    match inputs.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_u64()
                    .ok_or_else(|| CoreEngineError::tool(op, format!("input '{name}' must be a non-negative integer"))),
    }
}
