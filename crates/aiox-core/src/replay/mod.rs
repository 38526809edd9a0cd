//! Replay Verifier.
//!
//! Restaura el snapshot de `in/` de un paquete en un sandbox nuevo, ejecuta el
//! plan con una política que deniega toda capability no determinista y
//! compara los hashes de los artifacts esperados. Un desajuste es un veredicto
//! `FAIL`, nunca un error.

use std::fs;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{ReplayPolicy, StaticAllowList};
use crate::constants::DIR_IN;
use crate::engine::{ExecutionOptions, PlanExecutor};
use crate::errors::CoreEngineError;
use crate::event::TxStore;
use crate::hashing::{hash_file, prefixed};
use crate::meter::ResourceMeter;
use crate::model::RunStatus;
use crate::package::Package;
use crate::sandbox::Sandbox;
use crate::tool::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Match,
    Mismatch,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCheck {
    pub path: String,
    pub expected: String,
    pub actual: Option<String>,
    pub outcome: ArtifactOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub package_id: String,
    pub plan_id: String,
    pub run_id: Uuid,
    pub run_status: RunStatus,
    pub artifacts: Vec<ArtifactCheck>,
    /// Informativo: `None` si el paquete no trae fingerprint esperado.
    pub fingerprint_matched: Option<bool>,
    pub verdict: Verdict,
}

impl ReplayReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn check(&self, path: &str) -> Option<&ArtifactCheck> {
        self.artifacts.iter().find(|a| a.path == path)
    }
}

pub struct ReplayVerifier<'a> {
    registry: &'a ToolRegistry,
    meter: Arc<ResourceMeter>,
    options: ExecutionOptions,
}

impl<'a> ReplayVerifier<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry,
               meter: ResourceMeter::shared(),
               options: ExecutionOptions::default() }
    }

    pub fn with_meter(mut self, meter: Arc<ResourceMeter>) -> Self {
        self.meter = meter;
        self
    }

    /// Timeouts y presupuesto del run de replay; `dry_run` se ignora.
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn replay<S: TxStore>(&self, package: &Package, sandbox: &Sandbox, store: S) -> Result<ReplayReport, CoreEngineError> {
        package.verify()?;
        if !sandbox.is_pristine()? {
            return Err(CoreEngineError::SandboxLayout(format!("replay requires a fresh sandbox, {} has content",
                                                              sandbox.root().display())));
        }
        restore_inputs(package, sandbox)?;

        let policy = ReplayPolicy::new(StaticAllowList::new(package.manifest.capabilities.iter().cloned()));
        let options = ExecutionOptions { dry_run: false,
                                         replay: true,
                                         ..self.options };
        let mut executor = PlanExecutor::builder(store, self.registry.clone()).policy(policy)
                                                                              .meter(Arc::clone(&self.meter))
                                                                              .options(options)
                                                                              .build();
        let run = executor.execute(&package.plan, sandbox)?;

        let mut artifacts = Vec::with_capacity(package.manifest.expected_artifacts.len());
        for expected in &package.manifest.expected_artifacts {
            let actual = match sandbox.resolve(&expected.path) {
                Ok(path) if path.is_file() => Some(prefixed(&hash_file(&path)?)),
                Ok(_) => None,
                Err(e) => {
                    warn!("expected artifact {} cannot be resolved: {e}", expected.path);
                    None
                }
            };
            let outcome = match &actual {
                None => ArtifactOutcome::Missing,
                Some(h) if *h == expected.sha256 => ArtifactOutcome::Match,
                Some(_) => ArtifactOutcome::Mismatch,
            };
            if outcome != ArtifactOutcome::Match {
                warn!("replay {}: {} {:?}", package.id, expected.path, outcome);
            }
            artifacts.push(ArtifactCheck { path: expected.path.clone(),
                                           expected: expected.sha256.clone(),
                                           actual,
                                           outcome });
        }

        let all_match = artifacts.iter().all(|a| a.outcome == ArtifactOutcome::Match);
        // Un run abortado nunca pasa, aunque los artifacts ya escritos coincidan.
        let pass = run.is_completed() && all_match;
        let fingerprint_matched = package.manifest
                                         .expected_fingerprint
                                         .as_ref()
                                         .map(|fp| run.fingerprint.as_ref() == Some(fp));
        let report = ReplayReport { package_id: package.id.clone(),
                                    plan_id: package.manifest.plan_id.clone(),
                                    run_id: run.run_id,
                                    run_status: run.status,
                                    artifacts,
                                    fingerprint_matched,
                                    verdict: if pass { Verdict::Pass } else { Verdict::Fail } };
        info!("replay of {} finished: {}", package.id, report.verdict.as_str());
        Ok(report)
    }
}

fn restore_inputs(package: &Package, sandbox: &Sandbox) -> Result<(), CoreEngineError> {
    let prefix = format!("{DIR_IN}/");
    for (path, bytes) in &package.files {
        if !path.starts_with(&prefix) {
            return Err(CoreEngineError::PackageIntegrity { expected: prefix.clone(),
                                                           actual: path.clone() });
        }
        let target = sandbox.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
    }
    Ok(())
}
