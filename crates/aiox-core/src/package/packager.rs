use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::{ExpectedArtifact, InputFile, Package, PackageManifest};
use crate::constants::{DIR_IN, ENGINE_VERSION, PACKAGE_FORMAT_VERSION};
use crate::errors::CoreEngineError;
use crate::event::TxStore;
use crate::hashing::{hash_bytes, hash_value, prefixed};
use crate::model::plan::literal_strings;
use crate::model::Plan;
use crate::repo::load_runs;
use crate::sandbox::Sandbox;
use crate::tool::ToolRegistry;

pub struct Packager<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> Packager<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    /// Empaqueta el plan con el snapshot de `in/` que referencia y los hashes
    /// del último run completado del mismo plan sobre esos mismos inputs.
    pub fn pack<S: TxStore + ?Sized>(&self, plan: &Plan, sandbox: &Sandbox, store: &S) -> Result<Package, CoreEngineError> {
        let plan_id = plan.plan_id();
        let tools = self.registry.manifests_for(plan.ops())?;
        let files = snapshot_inputs(plan, sandbox)?;
        let digest = inputs_digest(&files);
        let inputs = files.iter()
                          .map(|(path, bytes)| InputFile { path: path.clone(),
                                                           sha256: prefixed(&hash_bytes(bytes)),
                                                           bytes: bytes.len() as u64 })
                          .collect();

        let completed: Vec<_> = load_runs(store)?.into_iter()
                                                 .rev()
                                                 .filter(|r| r.plan_id == plan_id && r.is_completed() && !r.dry_run)
                                                 .collect();
        // Runs sin digest registrado se aceptan tal cual.
        let source = completed.iter()
                              .find(|r| r.inputs_digest.as_ref().map_or(true, |d| *d == digest));
        if let (Some(latest), Some(run)) = (completed.first(), source) {
            if latest.run_id != run.run_id {
                warn!("in/ changed since run {} of plan {plan_id}; using expectations of run {}",
                      latest.run_id, run.run_id);
            }
        }
        let (expected_artifacts, expected_fingerprint) = match source {
            Some(run) => {
                debug!("packaging expectations from run {}", run.run_id);
                (run.final_artifacts()
                    .into_iter()
                    .map(|a| ExpectedArtifact { path: a.path,
                                                sha256: a.sha256,
                                                bytes: a.bytes })
                    .collect(),
                 run.fingerprint.clone())
            }
            None if !completed.is_empty() => {
                warn!("in/ changed since the last completed run of plan {plan_id}; package carries no expected artifacts");
                (Vec::new(), None)
            }
            None => {
                warn!("no completed run of plan {plan_id}; package carries no expected artifacts");
                (Vec::new(), None)
            }
        };

        let manifest = PackageManifest { format_version: PACKAGE_FORMAT_VERSION,
                                         engine_version: ENGINE_VERSION.to_string(),
                                         plan_id,
                                         goal: plan.goal.clone(),
                                         capabilities: plan.declared_capabilities(),
                                         tools,
                                         inputs,
                                         expected_artifacts,
                                         expected_fingerprint };
        let package = Package { id: manifest.package_id()?,
                                manifest,
                                plan: plan.clone(),
                                files };
        info!("packaged plan {} as {} ({} input files)",
              package.manifest.plan_id,
              package.id,
              package.files.len());
        Ok(package)
    }
}

/// `sha256:` de `{ruta: hash}` de los inputs; identifica el estado de `in/`
/// que ve un run.
pub(crate) fn inputs_digest(files: &BTreeMap<String, Vec<u8>>) -> String {
    let map: Map<String, Value> = files.iter()
                                       .map(|(path, bytes)| (path.clone(), Value::String(prefixed(&hash_bytes(bytes)))))
                                       .collect();
    prefixed(&hash_value(&Value::Object(map)))
}

/// Todo literal string del plan que resuelve bajo `in/`: un archivo, o cada
/// archivo bajo un directorio. Literales que no son rutas se ignoran.
pub(crate) fn snapshot_inputs(plan: &Plan, sandbox: &Sandbox) -> Result<BTreeMap<String, Vec<u8>>, CoreEngineError> {
    let mut files = BTreeMap::new();
    let prefix = format!("{DIR_IN}/");
    for step in &plan.steps {
        let mut literals = Vec::new();
        for value in step.inputs.values() {
            literal_strings(value, &mut literals);
        }
        for literal in literals {
            let Ok(rel) = sandbox.relative(literal) else {
                continue;
            };
            if rel != DIR_IN && !rel.starts_with(&prefix) {
                continue;
            }
            collect(sandbox, &sandbox.root().join(&rel), &mut files)?;
        }
    }
    Ok(files)
}

fn collect(sandbox: &Sandbox, path: &Path, files: &mut BTreeMap<String, Vec<u8>>) -> Result<(), CoreEngineError> {
    let resolved = sandbox.resolve(path)?;
    if resolved.is_file() {
        let rel = sandbox.relative(&resolved)?;
        if !files.contains_key(&rel) {
            files.insert(rel, fs::read(&resolved)?);
        }
    } else if resolved.is_dir() {
        let mut children: Vec<_> = fs::read_dir(&resolved)?.collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            collect(sandbox, &child.path(), files)?;
        }
    }
    Ok(())
}
