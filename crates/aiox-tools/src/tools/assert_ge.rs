//! `assert_ge {value, field, threshold}`: falla el step si
//! `value[field] < threshold`.

use aiox_core::{CoreEngineError, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use log::info;
use serde_json::json;

use super::TOOLS_VERSION;
use crate::inputs::{f64_arg, required, str_arg};

const OP: &str = "assert_ge";

#[derive(Debug, Clone, Copy, Default)]
pub struct AssertGe;

impl Tool for AssertGe {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Assert that a numeric field is at least a threshold")
                                            .input("value")
                                            .input("field")
                                            .input("threshold")
    }

    fn invoke(&self, inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let field = str_arg(OP, inputs, "field")?;
        let threshold = f64_arg(OP, inputs, "threshold")?;
        let value = required(OP, inputs, "value")?.get(field)
                                                  .ok_or_else(|| CoreEngineError::tool(OP, format!("field '{field}' not found")))?;
        let actual = value.as_f64()
                          .ok_or_else(|| CoreEngineError::tool(OP, format!("field '{field}' is not numeric: {value}")))?;
        if actual < threshold {
            return Err(CoreEngineError::tool(OP, format!("assertion failed: {field}={actual} < {threshold}")));
        }
        info!("assert_ge {field}={actual} >= {threshold}");
        Ok(ToolOutput::new(json!({ "field": field, "value": actual, "threshold": threshold })))
    }
}
