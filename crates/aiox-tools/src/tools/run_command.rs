//! `run_command {program, args?}`: lanza un proceso con cwd en el sandbox.
//!
//! El proceso hereda el deadline del step: si no termina a tiempo se mata y
//! el step falla con `Timeout`. Un código de salida distinto de cero es un
//! fallo del tool.

use std::process::Command;

use aiox_core::model::capability::PROC_SPAWN;
use aiox_core::{CoreEngineError, Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput};
use log::debug;
use serde_json::{json, Value};

use super::TOOLS_VERSION;
use crate::inputs::str_arg;

const OP: &str = "run_command";
/// Bytes de stderr incluidos en el mensaje de error.
const STDERR_TAIL: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunCommand;

impl Tool for RunCommand {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(OP, TOOLS_VERSION).describe("Run a program inside the sandbox root")
                                            .requires(PROC_SPAWN)
                                            .input("program")
                                            .optional_input("args")
                                            .nondeterministic()
    }

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let program = str_arg(OP, inputs, "program")?;
        let args: Vec<String> = match inputs.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter()
                                              .map(|v| match v {
                                                  Value::String(s) => Ok(s.clone()),
                                                  Value::Number(n) => Ok(n.to_string()),
                                                  _ => Err(CoreEngineError::tool(OP, "args must be strings or numbers")),
                                              })
                                              .collect::<Result<_, _>>()?,
            Some(_) => return Err(CoreEngineError::tool(OP, "input 'args' must be an array")),
        };
        let mut command = Command::new(program);
        command.args(&args);
        debug!("run_command {program} {args:?}");
        let output = ctx.spawn(command)?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(start..).unwrap_or(&stderr);
            return Err(CoreEngineError::tool(OP, format!("{program} exited with {}: {}", output.status, tail.trim())));
        }
        Ok(ToolOutput::new(json!({ "status": output.status.code(), "stdout": stdout, "stderr": stderr })))
    }
}
