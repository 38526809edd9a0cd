//! Contrato de tools y registry.
//!
//! Un tool es una operación cerrada identificada por nombre (`op` en el plan).
//! Declara en su manifest los inputs que acepta y las capabilities que
//! necesita; el executor valida ambos antes de invocarlo.

mod context;
mod registry;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use context::ToolContext;
pub use registry::ToolRegistry;

use crate::errors::CoreEngineError;
use crate::meter::ResourceUsage;

/// Inputs ya resueltos (referencias sustituidas por sus valores).
pub type ToolInputs = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInputSpec {
    pub name: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Nombres de capability requeridos (`fs.read`, `proc.spawn`, ...).
    pub capabilities: Vec<String>,
    pub inputs: Vec<ToolInputSpec>,
    /// Resultado función pura de los inputs y del contenido del sandbox.
    pub deterministic: bool,
}

impl ToolManifest {
    pub fn new(name: &str, version: &str) -> Self {
        Self { name: name.to_string(),
               version: version.to_string(),
               description: String::new(),
               capabilities: Vec::new(),
               inputs: Vec::new(),
               deterministic: true }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn requires(mut self, capability: &str) -> Self {
        self.capabilities.push(capability.to_string());
        self
    }

    pub fn input(mut self, name: &str) -> Self {
        self.inputs.push(ToolInputSpec { name: name.to_string(),
                                         required: true });
        self
    }

    pub fn optional_input(mut self, name: &str) -> Self {
        self.inputs.push(ToolInputSpec { name: name.to_string(),
                                         required: false });
        self
    }

    pub fn nondeterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    /// Inputs obligatorios presentes y ningún input desconocido.
    pub fn validate_inputs<'a>(&self, step_id: &str, names: impl IntoIterator<Item = &'a String>) -> Result<(), CoreEngineError> {
        let given: Vec<&String> = names.into_iter().collect();
        for spec in self.inputs.iter().filter(|s| s.required) {
            if !given.iter().any(|g| **g == spec.name) {
                return Err(CoreEngineError::InvalidPlan(format!("step '{step_id}' is missing input '{}' of '{}'",
                                                                spec.name, self.name)));
            }
        }
        for g in given {
            if !self.inputs.iter().any(|s| &s.name == g) {
                return Err(CoreEngineError::InvalidPlan(format!("step '{step_id}' passes unexpected input '{g}' to '{}'",
                                                                self.name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    /// Uso declarado por el tool para esta invocación.
    pub usage: ResourceUsage,
}

impl ToolOutput {
    pub fn new(value: Value) -> Self {
        Self { value,
               usage: ResourceUsage::default() }
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Trait que define un tool. Toda E/S pasa por `ToolContext`, que aplica la
/// contención del sandbox y las capabilities concedidas.
pub trait Tool: Send + Sync {
    fn manifest(&self) -> ToolManifest;

    fn invoke(&self, inputs: &ToolInputs, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError>;
}
