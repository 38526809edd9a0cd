#![allow(dead_code)]

use std::path::Path;
use std::thread;
use std::time::Duration;

use aiox_core::model::capability::{FS_READ, FS_WRITE};
use aiox_core::{CoreEngineError, Micros, ResourceUsage, Sandbox, Tool, ToolContext, ToolInputs, ToolManifest,
                ToolOutput, ToolRegistry};
use serde_json::{json, Value};

fn str_input<'a>(op: &str, inputs: &'a ToolInputs, name: &str) -> Result<&'a str, CoreEngineError> {
    inputs.get(name)
          .and_then(Value::as_str)
          .ok_or_else(|| CoreEngineError::tool(op, format!("input '{name}' must be a string")))
}

pub struct Echo;

impl Tool for Echo {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("echo", "1.0").input("value")
    }

    fn invoke(&self, inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        Ok(ToolOutput::new(inputs["value"].clone()).with_usage(ResourceUsage::new(Micros(100), Micros(10), 1)))
    }
}

pub struct Fail;

impl Tool for Fail {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("fail", "1.0").optional_input("input")
    }

    fn invoke(&self, _inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        Err(CoreEngineError::tool("fail", "boom"))
    }
}

pub struct ReadText;

impl Tool for ReadText {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("read_text", "1.0").requires(FS_READ).input("path")
    }

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let text = ctx.read_to_string(str_input("read_text", inputs, "path")?)?;
        Ok(ToolOutput::new(json!(text)))
    }
}

/// Escribe `text` en `path`; con `suffix` simula un tool que cambió de versión.
pub struct WriteText {
    pub suffix: &'static str,
}

impl Tool for WriteText {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("write_text", "1.0").requires(FS_WRITE).input("path").input("text")
    }

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let path = str_input("write_text", inputs, "path")?;
        let text = match &inputs["text"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let rec = ctx.write(path, format!("{text}{}", self.suffix).as_bytes())?;
        Ok(ToolOutput::new(json!({"path": rec.path, "sha256": rec.sha256}))
           .with_usage(ResourceUsage::for_bytes_written(rec.bytes)))
    }
}

/// Duerme sin consultar el deadline.
pub struct Sleep;

impl Tool for Sleep {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("sleep", "1.0").input("ms")
    }

    fn invoke(&self, inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        thread::sleep(Duration::from_millis(inputs["ms"].as_u64().unwrap_or(0)));
        Ok(ToolOutput::new(json!("awake")))
    }
}

pub struct Spend;

impl Tool for Spend {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("spend", "1.0").input("tokens")
    }

    fn invoke(&self, inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        let tokens = inputs["tokens"].as_u64().unwrap_or(0);
        Ok(ToolOutput::new(json!(tokens)).with_usage(ResourceUsage::new(Micros::ZERO, Micros::ZERO, tokens)))
    }
}

pub fn registry() -> ToolRegistry {
    ToolRegistry::new().with(Echo)
                       .with(Fail)
                       .with(ReadText)
                       .with(WriteText { suffix: "" })
                       .with(Sleep)
                       .with(Spend)
}

pub fn sandbox(dir: &Path) -> Sandbox {
    Sandbox::create(&dir.join("sandbox"), false).unwrap()
}
