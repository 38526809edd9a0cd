//! `split {table, ratio?, seed?}` -> `{train, val}`.
//!
//! Partición determinista: la fila `i` va a train si el primer byte de
//! `sha256("{i}:{seed}")` normalizado a `[0, 1]` es menor que `ratio`. Si
//! validación queda vacía y train tiene más de una fila, la última fila de
//! train pasa a validación.

use aiox_core::{CoreEngineError, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::TOOLS_VERSION;
use crate::inputs::{opt_f64, opt_u64, required};
use crate::table::Table;

const OP: &str = "split";
const DEFAULT_RATIO: f64 = 0.8;
const DEFAULT_SEED: u64 = 1337;

#[derive(Debug, Clone, Copy, Default)]
pub struct Split;

impl Tool for Split {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Deterministically split a table into train and validation sets")
                                            .input("table")
                                            .optional_input("ratio")
                                            .optional_input("seed")
    }

    fn invoke(&self, inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let table = Table::from_value(OP, required(OP, inputs, "table")?)?;
        let ratio = opt_f64(OP, inputs, "ratio", DEFAULT_RATIO)?;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(CoreEngineError::tool(OP, format!("ratio {ratio} outside [0, 1]")));
        }
        let seed = opt_u64(OP, inputs, "seed", DEFAULT_SEED)?;
        let (train, val) = split(&table, ratio, seed);
        Ok(ToolOutput::new(json!({ "train": train.to_value(), "val": val.to_value() })))
    }
}

pub fn split(table: &Table, ratio: f64, seed: u64) -> (Table, Table) {
    let mut train = Vec::new();
    let mut val = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let digest = Sha256::digest(format!("{i}:{seed}").as_bytes());
        if f64::from(digest[0]) / 255.0 < ratio {
            train.push(row.clone());
        } else {
            val.push(row.clone());
        }
    }
    if val.is_empty() && train.len() > 1 {
        if let Some(last) = train.pop() {
            val.push(last);
        }
    }
    (Table::new(table.header.clone(), train), Table::new(table.header.clone(), val))
}
