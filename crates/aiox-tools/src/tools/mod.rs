//! Tools incluidos.

pub mod assert_ge;
pub mod emit_report;
pub mod profile;
pub mod read_csv;
pub mod run_command;
pub mod split;
pub mod write_json;

pub use assert_ge::AssertGe;
pub use emit_report::EmitReport;
pub use profile::Profile;
pub use read_csv::ReadCsv;
pub use run_command::RunCommand;
pub use split::Split;
pub use write_json::WriteJson;

/// Versión común de los tools de este crate; entra en los manifests
/// empaquetados.
pub const TOOLS_VERSION: &str = "1.0.0";

#[cfg(test)]
pub(crate) mod testing {
    use aiox_core::{Capability, CoreEngineError, GrantDecision, GrantTable, Sandbox, Tool, ToolContext, ToolOutput};
    use serde_json::Value;
    use tempfile::TempDir;

    /// Sandbox temporal con un conjunto fijo de capabilities concedidas.
    pub(crate) struct Harness {
        _dir: TempDir,
        pub sandbox: Sandbox,
        pub grants: GrantTable,
    }

    impl Harness {
        pub(crate) fn new(grants: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let sandbox = Sandbox::create(&dir.path().join("sb"), false).unwrap();
            let mut table = GrantTable::new();
            for g in grants {
                table.record(g.parse::<Capability>().unwrap(), GrantDecision::Granted);
            }
            Self { _dir: dir,
                   sandbox,
                   grants: table }
        }

        pub(crate) fn invoke(&self, tool: &dyn Tool, inputs: Value) -> Result<ToolOutput, CoreEngineError> {
            let name = tool.manifest().name;
            let map = inputs.as_object().cloned().unwrap_or_default();
            let mut ctx = ToolContext::new(&self.sandbox, &self.grants, &name, &format!("00-{name}"), 5_000);
            tool.invoke(&map, &mut ctx)
        }
    }
}
