//! Deshacer el último run.
//!
//! Elimina, en orden inverso, los archivos que el run creó y deja una entrada
//! compensatoria `artifact_reverted` por cada uno bajo un run id nuevo, también
//! por los que se conservan (`kept`). El log nunca se reescribe.

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreEngineError;
use crate::event::{TxEntryKind, TxStore};
use crate::hashing::{hash_file, prefixed};
use crate::repo::load_runs;
use crate::sandbox::Sandbox;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
    pub undo_run_id: Uuid,
    /// Run revertido; `None` si no había nada que deshacer.
    pub reverted_run: Option<Uuid>,
    pub removed: Vec<String>,
    /// Archivos creados por el run pero modificados o borrados después.
    pub skipped: Vec<String>,
}

/// Revierte el run más reciente (no dry-run, no revertido) que creó archivos.
pub fn undo_last_run<S: TxStore + ?Sized>(sandbox: &Sandbox,
                                          store: &mut S,
                                          lock_timeout: Duration)
                                          -> Result<UndoReport, CoreEngineError> {
    let undo_run_id = Uuid::new_v4();
    let _lock = sandbox.lock(undo_run_id, lock_timeout)?;
    store.refresh()?;
    let mut report = UndoReport { undo_run_id,
                                  reverted_run: None,
                                  removed: Vec::new(),
                                  skipped: Vec::new() };

    let runs = load_runs(store)?;
    let Some(target) = runs.iter()
                           .rev()
                           .find(|r| !r.dry_run && !r.reverted && r.artifacts.iter().any(|a| a.created))
    else {
        info!("undo: nothing to revert");
        return Ok(report);
    };
    report.reverted_run = Some(target.run_id);

    let mut seen = HashSet::new();
    for created in target.artifacts.iter().rev().filter(|a| a.created) {
        if !seen.insert(created.path.clone()) {
            continue;
        }
        // El hash esperado es el último escrito por el run en esa ruta.
        let last = target.artifacts
                         .iter()
                         .rev()
                         .find(|a| a.path == created.path)
                         .unwrap_or(created);
        let path = sandbox.resolve(&created.path)?;
        let current = hash_file(&path).ok().map(|h| prefixed(&h));
        let kept = current.as_deref() != Some(last.sha256.as_str());
        match &current {
            None => warn!("undo: {} no longer exists", created.path),
            Some(_) if kept => warn!("undo: {} was modified after run {}, keeping it", created.path, target.run_id),
            Some(_) => fs::remove_file(&path)?,
        }
        // También los archivos conservados dejan entrada: el run queda revertido.
        store.append(undo_run_id,
                     TxEntryKind::ArtifactReverted { reverted_run: target.run_id,
                                                     path: created.path.clone(),
                                                     sha256: current,
                                                     kept })
             .map_err(|e| match e {
                 CoreEngineError::LogWrite(_) => e,
                 other => CoreEngineError::LogWrite(other.to_string()),
             })?;
        if kept {
            report.skipped.push(created.path.clone());
        } else {
            report.removed.push(created.path.clone());
        }
    }
    info!("undo: run {} reverted ({} removed, {} skipped)",
          target.run_id,
          report.removed.len(),
          report.skipped.len());
    Ok(report)
}
