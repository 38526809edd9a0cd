//! `write_json {value, path}`: JSON indentado con claves ordenadas.

use aiox_core::model::capability::FS_WRITE;
use aiox_core::{CoreEngineError, ResourceUsage, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use serde_json::{json, Map, Value};

use super::TOOLS_VERSION;
use crate::inputs::{required, str_arg};

const OP: &str = "write_json";

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteJson;

impl Tool for WriteJson {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Write a value as pretty JSON with sorted keys")
                                            .requires(FS_WRITE)
                                            .input("value")
                                            .input("path")
    }

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let value = sorted(required(OP, inputs, "value")?);
        let path = str_arg(OP, inputs, "path")?;
        let mut bytes = serde_json::to_vec_pretty(&value)?;
        bytes.push(b'\n');
        let record = ctx.write(path, &bytes)?;
        Ok(ToolOutput::new(json!({ "path": record.path, "sha256": record.sha256, "bytes": record.bytes }))
           .with_usage(ResourceUsage::for_bytes_written(record.bytes)))
    }
}

/// Copia de `value` con las claves de cada objeto insertadas en orden.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(m) => {
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), sorted(&m[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::Harness;

    #[test]
    fn output_is_pretty_and_sorted() {
        let h = Harness::new(&["fs.write"]);
        h.invoke(&WriteJson, json!({"value": {"b": 1, "a": {"d": 2, "c": 3}}, "path": "out/m.json"}))
         .unwrap();
        let text = std::fs::read_to_string(h.sandbox.root().join("out/m.json")).unwrap();
        assert_eq!(text, "{\n  \"a\": {\n    \"c\": 3,\n    \"d\": 2\n  },\n  \"b\": 1\n}\n");
    }
}
