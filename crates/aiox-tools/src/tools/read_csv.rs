//! `read_csv {path}` -> tabla.
//!
//! - La primera fila es el header; un archivo sin header es un error.
//! - Las celdas se convierten con `coerce_cell`.
//! - Filas con distinto número de columnas que el header son un error.

use aiox_core::model::capability::FS_READ;
use aiox_core::{CoreEngineError, ResourceUsage, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use log::debug;

use super::TOOLS_VERSION;
use crate::inputs::str_arg;
use crate::table::{coerce_cell, Table};

const OP: &str = "read_csv";

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadCsv;

impl Tool for ReadCsv {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Read a CSV file from the sandbox into a table")
                                            .requires(FS_READ)
                                            .input("path")
    }

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let path = str_arg(OP, inputs, "path")?;
        let bytes = ctx.read(path)?;
        let table = parse(&bytes)?;
        debug!("read_csv {path}: {} columns, {} rows", table.header.len(), table.len());
        Ok(ToolOutput::new(table.to_value()).with_usage(ResourceUsage::for_bytes_read(bytes.len() as u64)))
    }
}

fn parse(bytes: &[u8]) -> Result<Table, CoreEngineError> {
    let fail = |msg: String| CoreEngineError::tool(OP, msg);
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let header: Vec<String> = reader.headers()
                                    .map_err(|e| fail(format!("cannot read header: {e}")))?
                                    .iter()
                                    .map(|h| h.trim().to_string())
                                    .collect();
    if header.is_empty() || header.iter().all(String::is_empty) {
        return Err(fail("empty CSV file".into()));
    }
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| fail(format!("malformed row: {e}")))?;
        rows.push(record.iter().map(coerce_cell).collect());
    }
    Ok(Table::new(header, rows))
}
