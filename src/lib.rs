//! AIOX
//!
//! Fachada del workspace:
//! - `kernel` re-exporta `aiox-core` (planes, broker, executor, paquetes).
//! - `persistence` re-exporta el log JSONL y la configuración por entorno.
//! - `tools` re-exporta los tools incluidos.
//!
//! Para la CLI ver `crates/aiox-cli`.

pub use aiox_core as kernel;
pub use aiox_persistence as persistence;
pub use aiox_tools as tools;

pub use aiox_core::{Package, Packager, Plan, PlanExecutor, ReplayVerifier, RunReport, Sandbox};
pub use aiox_persistence::{JsonlTxStore, KernelConfig};
pub use aiox_tools::builtin_registry;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tools_are_registered() {
        let registry = builtin_registry();
        for op in ["read_csv", "profile", "split", "assert_ge", "emit_report", "write_json", "run_command"] {
            assert!(registry.contains(op), "falta el tool {op}");
        }
    }
}
