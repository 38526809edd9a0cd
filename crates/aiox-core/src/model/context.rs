use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::plan::as_reference;
use crate::capability::GrantTable;
use crate::errors::CoreEngineError;
use crate::meter::RunMeter;

/// Estado mutable de un run. Pertenece a un único executor y nunca se
/// comparte.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub sandbox_root: PathBuf,
    /// Outputs ligados por nombre, en orden de ejecución.
    pub bindings: IndexMap<String, Value>,
    pub grants: GrantTable,
    pub meter: RunMeter,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid, sandbox_root: PathBuf, meter: RunMeter) -> Self {
        Self { run_id,
               sandbox_root,
               bindings: IndexMap::new(),
               grants: GrantTable::new(),
               meter }
    }

    /// Liga un output. Un binding nunca se reasigna.
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), CoreEngineError> {
        if self.bindings.contains_key(name) {
            return Err(CoreEngineError::InvalidPlan(format!("binding '{name}' already bound")));
        }
        self.bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Sustituye cada `{"$ref": name}` (a cualquier profundidad) por el valor
    /// ligado.
    pub fn resolve_inputs(&self,
                          step_id: &str,
                          inputs: &BTreeMap<String, Value>)
                          -> Result<Map<String, Value>, CoreEngineError> {
        inputs.iter()
              .map(|(k, v)| Ok((k.clone(), self.resolve_value(step_id, v)?)))
              .collect()
    }

    fn resolve_value(&self, step_id: &str, value: &Value) -> Result<Value, CoreEngineError> {
        if let Some(name) = as_reference(value) {
            return self.bindings
                       .get(name)
                       .cloned()
                       .ok_or_else(|| CoreEngineError::UnboundReference { step_id: step_id.to_string(),
                                                                          reference: name.to_string() });
        }
        match value {
            Value::Array(items) => Ok(Value::Array(items.iter()
                                                        .map(|v| self.resolve_value(step_id, v))
                                                        .collect::<Result<_, _>>()?)),
            Value::Object(m) => Ok(Value::Object(m.iter()
                                                  .map(|(k, v)| Ok((k.clone(), self.resolve_value(step_id, v)?)))
                                                  .collect::<Result<_, CoreEngineError>>()?)),
            other => Ok(other.clone()),
        }
    }
}
