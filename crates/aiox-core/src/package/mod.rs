//! Packager: captura un plan junto a sus inputs y los hashes esperados de sus
//! outputs en un archivo content-addressed (`*.aiox`).

mod archive;
mod packager;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use packager::Packager;
pub(crate) use packager::{inputs_digest, snapshot_inputs};

use crate::errors::CoreEngineError;
use crate::hashing::{hash_bytes, hash_value, prefixed, to_canonical_json};
use crate::model::{Capability, Plan};
use crate::tool::ToolManifest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedArtifact {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Contenido identitario del paquete. Sin timestamps ni run ids: dos
/// empaquetados del mismo estado producen el mismo id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub format_version: u32,
    pub engine_version: String,
    pub plan_id: String,
    pub goal: String,
    pub capabilities: Vec<Capability>,
    pub tools: Vec<ToolManifest>,
    pub inputs: Vec<InputFile>,
    pub expected_artifacts: Vec<ExpectedArtifact>,
    pub expected_fingerprint: Option<String>,
}

impl PackageManifest {
    pub fn canonical_json(&self) -> Result<String, CoreEngineError> {
        Ok(to_canonical_json(&serde_json::to_value(self)?))
    }

    /// `sha256:<hex>` del manifest canónico.
    pub fn package_id(&self) -> Result<String, CoreEngineError> {
        Ok(prefixed(&hash_value(&serde_json::to_value(self)?)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub id: String,
    pub manifest: PackageManifest,
    pub plan: Plan,
    /// Snapshot de `in/`: ruta relativa al sandbox -> bytes.
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Package {
    /// Recalcula la identidad y verifica plan e inputs contra el manifest.
    pub fn verify(&self) -> Result<(), CoreEngineError> {
        let derived = self.manifest.package_id()?;
        if derived != self.id {
            return Err(CoreEngineError::PackageIntegrity { expected: self.id.clone(),
                                                           actual: derived });
        }
        let plan_id = self.plan.plan_id();
        if plan_id != self.manifest.plan_id {
            return Err(CoreEngineError::PackageIntegrity { expected: self.manifest.plan_id.clone(),
                                                           actual: plan_id });
        }
        if self.files.len() != self.manifest.inputs.len() {
            return Err(CoreEngineError::PackageIntegrity { expected: format!("{} input files", self.manifest.inputs.len()),
                                                           actual: format!("{} input files", self.files.len()) });
        }
        for input in &self.manifest.inputs {
            let bytes = self.files
                            .get(&input.path)
                            .ok_or_else(|| CoreEngineError::PackageIntegrity { expected: input.path.clone(),
                                                                               actual: "missing".into() })?;
            let actual = prefixed(&hash_bytes(bytes));
            if actual != input.sha256 {
                return Err(CoreEngineError::PackageIntegrity { expected: input.sha256.clone(),
                                                               actual });
            }
        }
        Ok(())
    }

    /// Primeros 12 hex del id, usados en el nombre de archivo.
    pub fn short_id(&self) -> &str {
        let hex = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        &hex[..hex.len().min(12)]
    }

    /// Nombre de archivo `<slug-del-goal>-<hex12>.aiox`.
    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", slug(&self.manifest.goal), self.short_id(), crate::constants::PACKAGE_EXTENSION)
    }
}

fn slug(text: &str) -> String {
    let mut out = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
        if out.len() >= 40 {
            break;
        }
    }
    let out = out.trim_end_matches('-').to_string();
    if out.is_empty() {
        "plan".to_string()
    } else {
        out
    }
}
