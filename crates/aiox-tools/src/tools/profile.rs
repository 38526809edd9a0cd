//! `profile {table}` -> `{rows, cols: [{name, dtype, missing}]}`.
//!
//! `dtype` es `number` si los valores numéricos superan a los de texto,
//! `string` en otro caso. `missing` es la fracción de celdas vacías o nulas.

use aiox_core::{CoreEngineError, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TOOLS_VERSION;
use crate::inputs::required;
use crate::table::Table;

const OP: &str = "profile";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub missing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub rows: usize,
    pub cols: Vec<ColumnProfile>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Profile;

impl Tool for Profile {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Infer column types and missing rates of a table")
                                            .input("table")
    }

    fn invoke(&self, inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let table = Table::from_value(OP, required(OP, inputs, "table")?)?;
        if table.header.is_empty() {
            return Err(CoreEngineError::tool(OP, "table has no columns"));
        }
        let schema = profile(&table);
        Ok(ToolOutput::new(serde_json::to_value(schema)?))
    }
}

pub fn profile(table: &Table) -> Schema {
    let cols = table.header
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let (mut numeric, mut text, mut missing, mut total) = (0usize, 0usize, 0usize, 0usize);
                        for value in table.column(i) {
                            total += 1;
                            match value {
                                Value::Null => missing += 1,
                                Value::String(s) if s.is_empty() => missing += 1,
                                Value::Number(_) => numeric += 1,
                                _ => text += 1,
                            }
                        }
                        ColumnProfile { name: name.clone(),
                                        dtype: if numeric > text { "number" } else { "string" }.to_string(),
                                        missing: missing as f64 / total.max(1) as f64 }
                    })
                    .collect();
    Schema { rows: table.len(),
             cols }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::Harness;
    use serde_json::json;

    #[test]
    fn profiles_types_and_missing_rate() {
        let h = Harness::new(&[]);
        let table = json!({"header": ["id", "name"], "rows": [[1, "a"], [2, ""], ["x", "b"], [3, "c"]]});
        let out = h.invoke(&Profile, json!({ "table": table })).unwrap();
        assert_eq!(out.value,
                   json!({"rows": 4, "cols": [
                       {"name": "id", "dtype": "number", "missing": 0.0},
                       {"name": "name", "dtype": "string", "missing": 0.25}
                   ]}));
    }

    #[test]
    fn rejects_non_tables() {
        let h = Harness::new(&[]);
        assert!(matches!(h.invoke(&Profile, json!({"table": "nope"})), Err(CoreEngineError::ToolExecution { .. })));
        assert!(h.invoke(&Profile, json!({"table": {"header": [], "rows": []}})).is_err());
    }
}
