//! Estado reconstruido de un run a partir del log.
//!
//! Fold lineal: se consumen las entradas en orden y se actualiza un
//! `RunInstance`. Sólo se guardan hashes y registros de artifacts, nunca
//! contenidos.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::CoreEngineError;
use crate::event::{TxEntry, TxEntryKind, TxStore};
use crate::meter::ResourceUsage;
use crate::model::{ArtifactRecord, RunStatus, StepStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct StepSlot {
    pub step_index: usize,
    pub step_id: String,
    pub op: String,
    pub status: StepStatus,
    pub output_hash: Option<String>,
    pub error: Option<CoreEngineError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunInstance {
    pub run_id: Uuid,
    pub plan_id: String,
    pub goal: String,
    pub dry_run: bool,
    pub replay: bool,
    /// Digest de `in/` registrado en `run_start`.
    pub inputs_digest: Option<String>,
    pub status: RunStatus,
    pub steps: Vec<StepSlot>,
    /// Artifacts en orden de escritura (de las entradas `artifact_written`).
    pub artifacts: Vec<ArtifactRecord>,
    pub totals: ResourceUsage,
    pub fingerprint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Algún `undo` posterior revirtió este run.
    pub reverted: bool,
}

impl RunInstance {
    /// Reconstruye un run. `None` si las entradas no empiezan con `run_start`
    /// (p.ej. las entradas compensatorias de `undo`).
    pub fn from_entries(run_id: Uuid, entries: &[TxEntry]) -> Option<RunInstance> {
        let first = entries.first()?;
        let TxEntryKind::RunStart { plan_id,
                                    goal,
                                    dry_run,
                                    replay,
                                    inputs_digest,
                                    .. } = &first.kind
        else {
            return None;
        };
        let mut run = RunInstance { run_id,
                                    plan_id: plan_id.clone(),
                                    goal: goal.clone(),
                                    dry_run: *dry_run,
                                    replay: *replay,
                                    inputs_digest: inputs_digest.clone(),
                                    status: RunStatus::Initializing,
                                    steps: Vec::new(),
                                    artifacts: Vec::new(),
                                    totals: ResourceUsage::default(),
                                    fingerprint: None,
                                    started_at: first.ts,
                                    finished_at: None,
                                    reverted: false };
        for entry in &entries[1..] {
            match &entry.kind {
                TxEntryKind::RunStart { .. } | TxEntryKind::ArtifactReverted { .. } => {}
                TxEntryKind::CapabilityCheck { .. } => {}
                TxEntryKind::StepStart { step_index, step_id, op } => {
                    run.status = RunStatus::Executing;
                    let slot = run.slot_mut(*step_index, step_id, op);
                    slot.status = StepStatus::Running;
                    slot.started_at = Some(entry.ts);
                }
                TxEntryKind::StepEnd { step_index,
                                       step_id,
                                       op,
                                       status,
                                       output_hash,
                                       error,
                                       .. } => {
                    let slot = run.slot_mut(*step_index, step_id, op);
                    slot.status = *status;
                    slot.output_hash = output_hash.clone();
                    slot.error = error.clone();
                    slot.finished_at = Some(entry.ts);
                }
                TxEntryKind::ArtifactWritten { artifact, .. } => run.artifacts.push(artifact.clone()),
                TxEntryKind::RunEnd { status,
                                      totals,
                                      fingerprint,
                                      .. } => {
                    run.status = *status;
                    run.totals = *totals;
                    run.fingerprint = fingerprint.clone();
                    run.finished_at = Some(entry.ts);
                }
            }
        }
        Some(run)
    }

    fn slot_mut(&mut self, step_index: usize, step_id: &str, op: &str) -> &mut StepSlot {
        let pos = match self.steps.iter().position(|s| s.step_index == step_index) {
            Some(pos) => pos,
            None => {
                self.steps.push(StepSlot { step_index,
                                           step_id: step_id.to_string(),
                                           op: op.to_string(),
                                           status: StepStatus::Pending,
                                           output_hash: None,
                                           error: None,
                                           started_at: None,
                                           finished_at: None });
                self.steps.len() - 1
            }
        };
        &mut self.steps[pos]
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Último registro por ruta (una ruta reescrita conserva el hash final).
    pub fn final_artifacts(&self) -> Vec<ArtifactRecord> {
        let mut seen = HashSet::new();
        let mut out: Vec<ArtifactRecord> = self.artifacts
                                               .iter()
                                               .rev()
                                               .filter(|a| seen.insert(a.path.clone()))
                                               .cloned()
                                               .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

/// Todos los runs del store en orden de inicio, marcando los revertidos.
pub fn load_runs<S: TxStore + ?Sized>(store: &S) -> Result<Vec<RunInstance>, CoreEngineError> {
    let mut runs = Vec::new();
    let mut reverted = HashSet::new();
    for run_id in store.run_ids()? {
        let entries = store.list(run_id)?;
        for e in &entries {
            if let TxEntryKind::ArtifactReverted { reverted_run, .. } = &e.kind {
                reverted.insert(*reverted_run);
            }
        }
        if let Some(run) = RunInstance::from_entries(run_id, &entries) {
            runs.push(run);
        }
    }
    for run in runs.iter_mut() {
        run.reverted = reverted.contains(&run.run_id);
    }
    Ok(runs)
}

/// Run completado más reciente (no dry-run) de un plan.
pub fn latest_completed_run<S: TxStore + ?Sized>(store: &S, plan_id: &str) -> Result<Option<RunInstance>, CoreEngineError> {
    Ok(load_runs(store)?.into_iter()
                        .rev()
                        .find(|r| r.plan_id == plan_id && r.is_completed() && !r.dry_run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryTxStore;

    fn start(plan: &str, dry_run: bool) -> TxEntryKind {
        TxEntryKind::RunStart { plan_id: plan.into(),
                                goal: "g".into(),
                                step_count: 1,
                                engine_version: "K1.0".into(),
                                dry_run,
                                replay: false,
                                inputs_digest: None }
    }

    fn end(status: RunStatus) -> TxEntryKind {
        TxEntryKind::RunEnd { status,
                              failed_step: None,
                              error: None,
                              artifacts: vec![],
                              totals: ResourceUsage::default(),
                              fingerprint: Some("sha256:f".into()) }
    }

    #[test]
    fn fold_tracks_step_states_and_artifacts() {
        let mut store = InMemoryTxStore::new();
        let run = Uuid::new_v4();
        store.append(run, start("p", false)).unwrap();
        store.append(run,
                     TxEntryKind::StepStart { step_index: 0,
                                              step_id: "00-a".into(),
                                              op: "a".into() })
             .unwrap();
        for sha in ["sha256:1", "sha256:2"] {
            store.append(run,
                         TxEntryKind::ArtifactWritten { step_id: "00-a".into(),
                                                        artifact: ArtifactRecord::new("out/x", sha, 1, true) })
                 .unwrap();
        }
        let inst = RunInstance::from_entries(run, &store.list(run).unwrap()).unwrap();
        assert_eq!(inst.status, RunStatus::Executing);
        assert_eq!(inst.steps[0].status, StepStatus::Running);
        assert_eq!(inst.final_artifacts(), vec![ArtifactRecord::new("out/x", "sha256:2", 1, true)]);
    }

    #[test]
    fn latest_completed_skips_dry_runs_and_aborted() {
        let mut store = InMemoryTxStore::new();
        let ok = Uuid::new_v4();
        store.append(ok, start("p", false)).unwrap();
        store.append(ok, end(RunStatus::Completed)).unwrap();
        let dry = Uuid::new_v4();
        store.append(dry, start("p", true)).unwrap();
        store.append(dry, end(RunStatus::Completed)).unwrap();
        let aborted = Uuid::new_v4();
        store.append(aborted, start("p", false)).unwrap();
        store.append(aborted, end(RunStatus::Aborted)).unwrap();

        let found = latest_completed_run(&store, "p").unwrap().unwrap();
        assert_eq!(found.run_id, ok);
        assert!(latest_completed_run(&store, "other").unwrap().is_none());
    }
}
