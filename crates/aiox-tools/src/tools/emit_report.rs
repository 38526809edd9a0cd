//! `emit_report {schema, metrics?, path}`: escribe un reporte markdown.

use aiox_core::model::capability::FS_WRITE;
use aiox_core::{CoreEngineError, ResourceUsage, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use serde_json::{json, Map, Value};

use super::profile::Schema;
use super::TOOLS_VERSION;
use crate::inputs::{required, str_arg};

const OP: &str = "emit_report";

#[derive(Debug, Clone, Copy, Default)]
pub struct EmitReport;

impl Tool for EmitReport {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Render a markdown report from a schema and optional metrics")
                                            .requires(FS_WRITE)
                                            .input("schema")
                                            .optional_input("metrics")
                                            .input("path")
    }

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let schema: Schema = serde_json::from_value(required(OP, inputs, "schema")?.clone())
            .map_err(|e| CoreEngineError::tool(OP, format!("input 'schema' is not a profile: {e}")))?;
        let empty = Map::new();
        let metrics = match inputs.get("metrics") {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(m)) => m,
            Some(_) => return Err(CoreEngineError::tool(OP, "input 'metrics' must be an object")),
        };
        let path = str_arg(OP, inputs, "path")?;
        let record = ctx.write(path, render(&schema, metrics).as_bytes())?;
        Ok(ToolOutput::new(json!({ "path": record.path, "sha256": record.sha256, "bytes": record.bytes }))
           .with_usage(ResourceUsage::for_bytes_written(record.bytes)))
    }
}

/// Markdown del reporte. Las métricas se listan en orden de clave.
pub fn render(schema: &Schema, metrics: &Map<String, Value>) -> String {
    let mut lines = vec!["# AIOX Report".to_string(),
                         String::new(),
                         "## Schema".to_string(),
                         format!("Rows: {}", schema.rows),
                         String::new(),
                         "| column | dtype | missing |".to_string(),
                         "|---|---|---:|".to_string()];
    for c in &schema.cols {
        lines.push(format!("| {} | {} | {:.3} |", c.name, c.dtype, c.missing));
    }
    if !metrics.is_empty() {
        lines.push(String::new());
        lines.push("## Metrics".to_string());
        let mut keys: Vec<&String> = metrics.keys().collect();
        keys.sort();
        for k in keys {
            match &metrics[k] {
                Value::Number(n) => match n.as_f64() {
                    Some(f) => lines.push(format!("- **{k}**: {f:.6}")),
                    None => lines.push(format!("- **{k}**: {n}")),
                },
                Value::String(s) => lines.push(format!("- **{k}**: {s}")),
                other => lines.push(format!("- **{k}**: {other}")),
            }
        }
    }
    lines.push(String::new());
    lines.join("\n")
}
