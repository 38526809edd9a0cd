//! Plan: documento declarativo producido por un planner externo.
//!
//! Un plan es una secuencia ordenada de steps `{op, in, out}` más un goal en
//! texto libre y el conjunto de capabilities que declara. Es inmutable una vez
//! cargado y se identifica por el hash de su serialización canónica.
//!
//! Referencias: dentro de `in`, el objeto `{"$ref": "<binding>"}` (en
//! cualquier nivel de anidamiento) apunta al output ligado por un step
//! anterior. Cualquier otro valor JSON es un literal.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::capability::Capability;
use crate::errors::CoreEngineError;
use crate::hashing::{hash_value, prefixed, to_canonical_json};

/// Clave reservada para referencias a bindings.
pub const REF_KEY: &str = "$ref";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub op: String,
    #[serde(rename = "in", default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl PlanStep {
    pub fn new(op: &str) -> Self {
        Self { id: None,
               op: op.to_string(),
               inputs: BTreeMap::new(),
               out: None,
               timeout_ms: None }
    }

    /// Añade un input literal.
    pub fn with_input(mut self, name: &str, value: Value) -> Self {
        self.inputs.insert(name.to_string(), value);
        self
    }

    /// Añade un input que referencia un binding anterior.
    pub fn with_ref(self, name: &str, binding: &str) -> Self {
        self.with_input(name, reference(binding))
    }

    pub fn with_out(mut self, binding: &str) -> Self {
        self.out = Some(binding.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Identificador estable del step: el `id` explícito o `"<index:02>-<op>"`.
    pub fn step_id(&self, index: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{index:02}-{}", self.op),
        }
    }

    /// Nombres de bindings referenciados por los inputs, en orden de clave.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for v in self.inputs.values() {
            collect_refs(v, &mut out);
        }
        out
    }

    fn canonical_value(&self) -> Value {
        let mut m = Map::new();
        if let Some(id) = &self.id {
            m.insert("id".into(), json!(id));
        }
        m.insert("op".into(), json!(self.op));
        m.insert("in".into(), Value::Object(self.inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()));
        if let Some(out) = &self.out {
            m.insert("out".into(), json!(out));
        }
        if let Some(t) = self.timeout_ms {
            m.insert("timeout_ms".into(), json!(t));
        }
        Value::Object(m)
    }
}

/// Construye el valor `{"$ref": binding}`.
pub fn reference(binding: &str) -> Value {
    json!({ REF_KEY: binding })
}

/// Si `value` es una referencia, devuelve el nombre del binding.
pub fn as_reference(value: &Value) -> Option<&str> {
    match value {
        Value::Object(m) if m.len() == 1 => m.get(REF_KEY).and_then(Value::as_str),
        _ => None,
    }
}

fn collect_refs<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    if let Some(name) = as_reference(value) {
        out.push(name);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(m) => m.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Recorre los literales string de un valor (no entra en referencias).
pub fn literal_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    if as_reference(value).is_some() {
        return;
    }
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| literal_strings(v, out)),
        Value::Object(m) => m.values().for_each(|v| literal_strings(v, out)),
        _ => {}
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(goal: &str) -> Self {
        Self { goal: goal.to_string(),
               capabilities: Vec::new(),
               steps: Vec::new() }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, CoreEngineError> {
        serde_json::from_str(s).map_err(|e| CoreEngineError::InvalidPlan(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, CoreEngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Valor JSON equivalente a la serialización serde, construido sin pasos
    /// falibles.
    pub fn canonical_value(&self) -> Value {
        json!({
            "goal": self.goal,
            "capabilities": self.capabilities.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            "steps": self.steps.iter().map(PlanStep::canonical_value).collect::<Vec<_>>(),
        })
    }

    pub fn canonical_json(&self) -> String {
        to_canonical_json(&self.canonical_value())
    }

    /// Identidad del plan: `sha256:<hex>` del JSON canónico.
    pub fn plan_id(&self) -> String {
        prefixed(&hash_value(&self.canonical_value()))
    }

    /// Capabilities declaradas, sin duplicados, en orden de declaración.
    pub fn declared_capabilities(&self) -> Vec<Capability> {
        let mut seen = HashSet::new();
        self.capabilities
            .iter()
            .filter(|c| seen.insert((*c).clone()))
            .cloned()
            .collect()
    }

    /// Operaciones usadas por el plan (ordenadas, sin duplicados).
    pub fn ops(&self) -> BTreeSet<&str> {
        self.steps.iter().map(|s| s.op.as_str()).collect()
    }

    /// Validación estructural independiente del registry: ops no vacías, ids y
    /// bindings únicos, y toda referencia resuelta por un step anterior.
    pub fn validate_bindings(&self) -> Result<(), CoreEngineError> {
        let mut bound: HashSet<&str> = HashSet::new();
        let mut ids: HashSet<String> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            let step_id = step.step_id(index);
            if step.op.trim().is_empty() {
                return Err(CoreEngineError::InvalidPlan(format!("step '{step_id}' has an empty op")));
            }
            if !ids.insert(step_id.clone()) {
                return Err(CoreEngineError::InvalidPlan(format!("duplicate step id '{step_id}'")));
            }
            for reference in step.references() {
                if !bound.contains(reference) {
                    return Err(CoreEngineError::UnboundReference { step_id,
                                                                   reference: reference.to_string() });
                }
            }
            if let Some(out) = &step.out {
                if out.is_empty() || !bound.insert(out.as_str()) {
                    return Err(CoreEngineError::InvalidPlan(format!("output binding '{out}' of step '{step_id}' is empty or already bound")));
                }
            }
        }
        Ok(())
    }
}
