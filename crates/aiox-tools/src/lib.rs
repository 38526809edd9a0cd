//! aiox-tools: tools de referencia para el kernel.
//!
//! Este crate provee:
//! - `Table`, la forma tabular `{header, rows}` que circula entre tools.
//! - Tools de datos (`read_csv`, `profile`, `split`, `assert_ge`) y de salida
//!   (`emit_report`, `write_json`, `run_command`).
//! - `builtin_registry()`, que los registra todos.
//!
//! Nota: ningún tool toca el sistema de archivos ni lanza procesos por su
//! cuenta; todo pasa por `ToolContext`, que aplica sandbox y capabilities.

mod inputs;
pub mod table;
pub mod tools;

use aiox_core::ToolRegistry;

pub use table::Table;
pub use tools::{AssertGe, EmitReport, Profile, ReadCsv, RunCommand, Split, WriteJson};

/// Registry con todos los tools incluidos.
pub fn builtin_registry() -> ToolRegistry {
    ToolRegistry::new().with(ReadCsv)
                       .with(Profile)
                       .with(Split)
                       .with(AssertGe)
                       .with(EmitReport)
                       .with(WriteJson)
                       .with(RunCommand)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exposes_every_builtin() {
        let names = builtin_registry().names().into_iter().map(str::to_string).collect::<Vec<_>>();
        assert_eq!(names,
                   vec!["assert_ge", "emit_report", "profile", "read_csv", "run_command", "split", "write_json"]);
    }
}
