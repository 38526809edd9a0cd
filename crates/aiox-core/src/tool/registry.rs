use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Tool, ToolManifest};
use crate::errors::CoreEngineError;

/// Mapa `op -> tool`. Orden por nombre para que los manifests empaquetados
/// sean deterministas.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un tool bajo el nombre de su manifest; reemplaza uno previo.
    pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        self.tools.insert(tool.manifest().name, tool);
        self
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, op: &str) -> Result<Arc<dyn Tool>, CoreEngineError> {
        self.tools
            .get(op)
            .cloned()
            .ok_or_else(|| CoreEngineError::UnknownOperation(op.to_string()))
    }

    pub fn contains(&self, op: &str) -> bool {
        self.tools.contains_key(op)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Manifests de las ops indicadas, ordenados por nombre.
    pub fn manifests_for<'a>(&self, ops: impl IntoIterator<Item = &'a str>) -> Result<Vec<ToolManifest>, CoreEngineError> {
        let mut out: Vec<ToolManifest> = ops.into_iter()
                                            .map(|op| self.get(op).map(|t| t.manifest()))
                                            .collect::<Result<_, _>>()?;
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out.dedup_by(|a, b| a.name == b.name);
        Ok(out)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
